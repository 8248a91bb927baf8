//! Pure-function project structure analyzer (spec.md §1, "out of scope"
//! collaborator listed alongside the log parser and file ranker): detects
//! whether a checked-out project is Maven- or Gradle-built, used by the
//! `plan` and `retrieve` handlers to decide which compile command the
//! `validate` stage will eventually run and which descriptor file to treat
//! as a build file.

use std::path::Path;

use crate::analysis::file_ranker::ScannedFile;
use crate::analysis::log_parser::has_spring_boot_marker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildSystem {
    Maven,
    Gradle,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct ProjectStructure {
    pub build_system: BuildSystem,
    pub is_spring_boot: bool,
    pub java_source_roots: Vec<String>,
}

/// Inspect a checked-out working directory's top level and detect its
/// build system, allowed Java source roots, and whether it looks like a
/// Spring Boot project (used to decide how aggressively the `retrieve`
/// stage should weigh Spring-annotation hits).
pub fn analyze(root: &Path) -> ProjectStructure {
    let build_system = if root.join("pom.xml").is_file() {
        BuildSystem::Maven
    } else if root.join("build.gradle").is_file() || root.join("build.gradle.kts").is_file() {
        BuildSystem::Gradle
    } else {
        BuildSystem::Unknown
    };

    let mut java_source_roots = Vec::new();
    for candidate in ["src/main/java", "src/test/java"] {
        if root.join(candidate).is_dir() {
            java_source_roots.push(candidate.to_string());
        }
    }

    let is_spring_boot = root
        .join("pom.xml")
        .is_file()
        .then(|| std::fs::read_to_string(root.join("pom.xml")).ok())
        .flatten()
        .map(|contents| has_spring_boot_marker(&contents))
        .unwrap_or(false);

    ProjectStructure {
        build_system,
        is_spring_boot,
        java_source_roots,
    }
}

/// The compile command the `validate` stage should run for a given build
/// system, matching the build-file conventions of §6.
pub fn compile_command(build_system: BuildSystem) -> (&'static str, &'static [&'static str]) {
    match build_system {
        BuildSystem::Maven => ("mvn", &["-q", "compile"]),
        BuildSystem::Gradle => ("./gradlew", &["compileJava", "--quiet"]),
        BuildSystem::Unknown => ("mvn", &["-q", "compile"]),
    }
}

/// Walk the allowed source roots and the build descriptor, producing
/// [`ScannedFile`]s for the file ranker. Bounded to the allowlisted
/// prefixes of §6 (`src/main/java`, `src/test/java`, `pom.xml`,
/// `build.gradle`), mirroring the patch-application path allowlist so the
/// same notion of "in scope" is used for both ranking and writing.
pub fn scan_files(root: &Path, structure: &ProjectStructure) -> std::io::Result<Vec<ScannedFile>> {
    let mut out = Vec::new();

    for source_root in &structure.java_source_roots {
        walk_java(&root.join(source_root), source_root, &mut out)?;
    }

    for descriptor in ["pom.xml", "build.gradle", "build.gradle.kts"] {
        if root.join(descriptor).is_file() {
            out.push(ScannedFile {
                relative_path: descriptor.to_string(),
                has_spring_annotation: false,
                is_build_file: true,
            });
        }
    }

    Ok(out)
}

fn walk_java(dir: &Path, relative_prefix: &str, out: &mut Vec<ScannedFile>) -> std::io::Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_name = entry.file_name().to_string_lossy().to_string();

        if path.is_dir() {
            walk_java(&path, &format!("{relative_prefix}/{file_name}"), out)?;
            continue;
        }

        if !file_name.ends_with(".java") {
            continue;
        }

        let contents = std::fs::read_to_string(&path).unwrap_or_default();
        out.push(ScannedFile {
            relative_path: format!("{relative_prefix}/{file_name}"),
            has_spring_annotation: crate::analysis::file_ranker::has_spring_annotation(&contents),
            is_build_file: false,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn detects_maven_project() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("pom.xml"), "<project/>").unwrap();
        let structure = analyze(dir.path());
        assert_eq!(structure.build_system, BuildSystem::Maven);
    }

    #[test]
    fn detects_gradle_project() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("build.gradle"), "plugins {}").unwrap();
        let structure = analyze(dir.path());
        assert_eq!(structure.build_system, BuildSystem::Gradle);
    }

    #[test]
    fn unknown_when_no_descriptor_present() {
        let dir = tempdir().unwrap();
        let structure = analyze(dir.path());
        assert_eq!(structure.build_system, BuildSystem::Unknown);
    }

    #[test]
    fn compile_command_matches_build_system() {
        let (cmd, _) = compile_command(BuildSystem::Maven);
        assert_eq!(cmd, "mvn");
        let (cmd, _) = compile_command(BuildSystem::Gradle);
        assert_eq!(cmd, "./gradlew");
    }

    #[test]
    fn scan_files_finds_java_sources_and_descriptor() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("pom.xml"), "<project/>").unwrap();
        std::fs::create_dir_all(dir.path().join("src/main/java/com/example")).unwrap();
        std::fs::write(
            dir.path().join("src/main/java/com/example/Foo.java"),
            "@Service\npublic class Foo {}",
        )
        .unwrap();

        let structure = analyze(dir.path());
        let scanned = scan_files(dir.path(), &structure).unwrap();

        assert!(scanned.iter().any(|f| f.relative_path.ends_with("Foo.java") && f.has_spring_annotation));
        assert!(scanned.iter().any(|f| f.relative_path == "pom.xml" && f.is_build_file));
    }
}
