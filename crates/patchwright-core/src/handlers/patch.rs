//! `patch`: prompt the LLM for a unified diff against the ranked candidate
//! files, validate every path it touches, apply it, and commit (spec.md
//! topology table: "LLM drafts a unified diff against ranked files";
//! §6's patch-safety guard).

use std::path::Path;

use async_trait::async_trait;
use patchwright_db::models::Task;
use patchwright_db::queries::{candidate_files, patches};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::handlers::{Handler, HandlerContext};
use crate::outcome::{ErrorKind, HandlerError, Outcome};
use crate::workdir;

/// How many of the highest-ranked candidate files' contents to inline into
/// the prompt. Kept well under the model's context window.
const MAX_FILES_IN_PROMPT: usize = 8;

pub struct PatchHandler;

#[async_trait]
impl Handler for PatchHandler {
    async fn handle(&self, ctx: &HandlerContext, task: &Task) -> Outcome {
        let Some(working_directory) = task.payload.get("working_directory").and_then(|v| v.as_str()) else {
            return Outcome::Failed {
                message: "patch stage requires working_directory in payload".to_string(),
                metadata: serde_json::json!({}),
            };
        };
        let build_logs = task
            .payload
            .get("build_logs")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let previous_failure_reason = task
            .payload
            .get("previous_failure_reason")
            .and_then(|v| v.as_str());

        let root = Path::new(working_directory);

        let candidates = match candidate_files::list_for_build(&ctx.pool, task.build_id).await {
            Ok(c) => c,
            Err(e) => return Outcome::retry(format!("failed to load candidate files: {e}"), ErrorKind::Transient),
        };

        let prompt = build_prompt(root, build_logs, previous_failure_reason, &candidates);

        let diff = match ctx.llm.generate_patch(&prompt).await {
            Ok(d) => d,
            Err(e) => return e.into_outcome(),
        };

        if let Err(message) = validate_diff_paths(&diff) {
            return Outcome::Failed {
                message,
                metadata: serde_json::json!({}),
            };
        }

        if let Err(e) = apply_diff(root, &diff).await {
            return e.into_outcome();
        }

        let commit_sha = match ctx.git.commit_all(root, &format!("ci-fix: build {}", task.build_id)).await {
            Ok(sha) => sha,
            Err(e) => return e.into_outcome(),
        };

        if let Err(e) = patches::insert(&ctx.pool, task.build_id, &diff, true, Some(&commit_sha)).await {
            return Outcome::retry(format!("failed to persist patch: {e}"), ErrorKind::Transient);
        }

        Outcome::completed(format!("applied and committed patch as {commit_sha}"))
    }
}

fn build_prompt(
    root: &Path,
    build_logs: &str,
    previous_failure_reason: Option<&str>,
    candidates: &[patchwright_db::models::CandidateFile],
) -> String {
    let mut prompt = String::new();
    prompt.push_str("A Java build is failing. Produce a unified diff (paths relative to the repository root) that fixes it.\n\n");
    prompt.push_str("Build log:\n");
    prompt.push_str(build_logs);
    prompt.push('\n');

    if let Some(reason) = previous_failure_reason {
        prompt.push_str("\nThe previous attempt failed for this reason -- account for it:\n");
        prompt.push_str(reason);
        prompt.push('\n');
    }

    prompt.push_str("\nCandidate files, highest-ranked first:\n");
    for candidate in candidates.iter().take(MAX_FILES_IN_PROMPT) {
        prompt.push_str(&format!("\n--- {} ({})\n", candidate.file_path, candidate.reason.as_deref().unwrap_or("")));
        let contents = std::fs::read_to_string(root.join(&candidate.file_path)).unwrap_or_default();
        prompt.push_str(&contents);
    }

    prompt
}

/// Every path a unified diff touches (`--- a/path` / `+++ b/path` headers,
/// excluding `/dev/null`) must validate against the patch-path allowlist
/// before the diff is applied.
fn validate_diff_paths(diff: &str) -> Result<(), String> {
    for line in diff.lines() {
        let stripped = if let Some(p) = line.strip_prefix("+++ b/") {
            Some(p)
        } else if let Some(p) = line.strip_prefix("--- a/") {
            Some(p)
        } else {
            None
        };

        let Some(path) = stripped else { continue };
        if path == "/dev/null" {
            continue;
        }
        workdir::validate_patch_path(path).map_err(|e| format!("patch rejected: {e}"))?;
    }
    Ok(())
}

/// Apply a unified diff to the working copy via `git apply`, reading the
/// diff from stdin.
async fn apply_diff(dir: &Path, diff: &str) -> Result<(), HandlerError> {
    let mut child = Command::new("git")
        .args(["apply", "--whitespace=fix", "-"])
        .current_dir(dir)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .map_err(|e| HandlerError::transient(format!("failed to spawn git apply: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(diff.as_bytes())
            .await
            .map_err(|e| HandlerError::transient(format!("failed to write diff to git apply: {e}")))?;
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| HandlerError::transient(format!("git apply did not exit cleanly: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(HandlerError::transient(format!("git apply failed: {stderr}")));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_diff_touching_only_allowed_paths() {
        let diff = "--- a/src/main/java/com/example/Foo.java\n+++ b/src/main/java/com/example/Foo.java\n";
        assert!(validate_diff_paths(diff).is_ok());
    }

    #[test]
    fn rejects_diff_touching_path_outside_allowlist() {
        let diff = "--- a/src/main/resources/application.yml\n+++ b/src/main/resources/application.yml\n";
        assert!(validate_diff_paths(diff).is_err());
    }

    #[test]
    fn rejects_diff_escaping_with_dotdot() {
        let diff = "--- a/src/main/java/../../etc/passwd\n+++ b/src/main/java/../../etc/passwd\n";
        assert!(validate_diff_paths(diff).is_err());
    }

    #[test]
    fn ignores_dev_null_headers() {
        let diff = "--- /dev/null\n+++ b/pom.xml\n";
        assert!(validate_diff_paths(diff).is_ok());
    }
}
