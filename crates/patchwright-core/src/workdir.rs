//! Centralized path safety (spec.md §9, Design Notes: "Filesystem
//! path-escape risks -> centralize path validation in one function") and
//! the working-directory retention sweep (spec.md §5).

use std::path::{Component, Path};

use chrono::{DateTime, Utc};

/// Paths written into patches are restricted to these prefixes (spec.md §6).
pub const ALLOWED_PATH_PREFIXES: &[&str] = &["src/main/java/", "src/test/java/"];

/// Exact file names allowed outside the prefix allowlist.
pub const ALLOWED_EXACT_FILES: &[&str] = &["pom.xml", "build.gradle"];

/// Validate that a relative path named in a patch is safe to write:
/// forbids `..`, a leading `/`, `~`, `$`, and null bytes, and requires it
/// fall under one of the allowlisted prefixes or be one of the allowlisted
/// exact file names.
pub fn validate_patch_path(path: &str) -> Result<(), String> {
    if path.contains('\0') {
        return Err("path contains a null byte".to_string());
    }
    if path.starts_with('/') || path.starts_with('~') || path.contains('$') {
        return Err(format!("path {path:?} escapes the allowed root"));
    }

    let normalized = Path::new(path);
    for component in normalized.components() {
        if matches!(component, Component::ParentDir) {
            return Err(format!("path {path:?} contains a '..' component"));
        }
    }

    let allowed_prefix = ALLOWED_PATH_PREFIXES.iter().any(|p| path.starts_with(p));
    let allowed_exact = ALLOWED_EXACT_FILES.contains(&path);

    if !allowed_prefix && !allowed_exact {
        return Err(format!(
            "path {path:?} is outside the allowed roots ({ALLOWED_PATH_PREFIXES:?} or {ALLOWED_EXACT_FILES:?})"
        ));
    }

    Ok(())
}

/// Per-build working directory convention (spec.md §6):
/// `{work_root}/build-{id}/`.
pub fn build_directory(work_root: &str, build_id: i64) -> std::path::PathBuf {
    Path::new(work_root).join(format!("build-{build_id}"))
}

/// Parse the build id out of a `build-{id}` directory name, for the
/// cleanup sweep's orphan-directory check.
pub fn parse_build_id(dir_name: &str) -> Option<i64> {
    dir_name.strip_prefix("build-").and_then(|s| s.parse().ok())
}

/// Whether a build's working directory is eligible for deletion: its
/// modified time is older than `retention`, counted from `now`.
pub fn is_expired(modified: DateTime<Utc>, now: DateTime<Utc>, retention: chrono::Duration) -> bool {
    now - modified > retention
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_parent_dir_escape() {
        assert!(validate_patch_path("src/main/java/../../etc/passwd").is_err());
    }

    #[test]
    fn rejects_absolute_path() {
        assert!(validate_patch_path("/etc/passwd").is_err());
    }

    #[test]
    fn rejects_home_and_dollar_expansion() {
        assert!(validate_patch_path("~/secrets").is_err());
        assert!(validate_patch_path("src/main/java/$HOME/Foo.java").is_err());
    }

    #[test]
    fn rejects_null_byte() {
        assert!(validate_patch_path("src/main/java/Foo.java\0").is_err());
    }

    #[test]
    fn rejects_path_outside_allowlist() {
        assert!(validate_patch_path("src/main/resources/application.yml").is_err());
    }

    #[test]
    fn accepts_allowlisted_source_path() {
        assert!(validate_patch_path("src/main/java/com/example/Foo.java").is_ok());
        assert!(validate_patch_path("src/test/java/com/example/FooTest.java").is_ok());
    }

    #[test]
    fn accepts_allowlisted_build_files() {
        assert!(validate_patch_path("pom.xml").is_ok());
        assert!(validate_patch_path("build.gradle").is_ok());
    }

    #[test]
    fn build_directory_follows_convention() {
        assert_eq!(
            build_directory("/work", 7),
            std::path::PathBuf::from("/work/build-7")
        );
    }

    #[test]
    fn parse_build_id_roundtrips() {
        assert_eq!(parse_build_id("build-42"), Some(42));
        assert_eq!(parse_build_id("not-a-build-dir"), None);
    }

    #[test]
    fn expiry_respects_retention_window() {
        let now = Utc::now();
        let retention = chrono::Duration::days(7);
        assert!(!is_expired(now - chrono::Duration::days(1), now, retention));
        assert!(is_expired(now - chrono::Duration::days(8), now, retention));
    }
}
