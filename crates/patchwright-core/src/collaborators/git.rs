//! Git working-copy manipulation (spec.md §1, "out of scope" collaborator):
//! `clone`, `checkout_new_branch`, `commit_all`, `push`.
//!
//! Grounded on the shell-subprocess style the teacher uses to drive worktree
//! checkouts: a thin wrapper that shells out to the `git` binary and turns a
//! non-zero exit into a `Collaborator` [`HandlerError`](crate::outcome::HandlerError).

use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;

use crate::outcome::HandlerError;

#[async_trait]
pub trait GitClient: Send + Sync {
    async fn clone_repo(
        &self,
        repo_url: &str,
        commit_sha: &str,
        dir: &Path,
    ) -> Result<(), HandlerError>;

    async fn checkout_new_branch(&self, dir: &Path, branch: &str) -> Result<(), HandlerError>;

    async fn commit_all(&self, dir: &Path, message: &str) -> Result<String, HandlerError>;

    async fn push(&self, dir: &Path, branch: &str) -> Result<(), HandlerError>;
}

/// Shells out to the system `git` binary.
pub struct ShellGitClient;

impl ShellGitClient {
    pub fn new() -> Self {
        Self
    }

    async fn run(&self, dir: &Path, args: &[&str]) -> Result<Output, HandlerError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .await
            .map_err(|e| HandlerError::transient(format!("failed to spawn git {args:?}: {e}")))?;
        Ok(output)
    }

    fn check(output: &Output, what: &str) -> Result<(), HandlerError> {
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(HandlerError::transient(format!(
            "git {what} failed: {stderr}"
        )))
    }
}

impl Default for ShellGitClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GitClient for ShellGitClient {
    async fn clone_repo(
        &self,
        repo_url: &str,
        commit_sha: &str,
        dir: &Path,
    ) -> Result<(), HandlerError> {
        if let Some(parent) = dir.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| HandlerError::transient(format!("failed to create {parent:?}: {e}")))?;
        }

        let dir_str = dir.to_string_lossy().to_string();
        let clone_out = Command::new("git")
            .args(["clone", repo_url, &dir_str])
            .output()
            .await
            .map_err(|e| HandlerError::transient(format!("failed to spawn git clone: {e}")))?;
        Self::check(&clone_out, "clone")?;

        let checkout_out = self.run(dir, &["checkout", commit_sha]).await?;
        Self::check(&checkout_out, "checkout commit")
    }

    async fn checkout_new_branch(&self, dir: &Path, branch: &str) -> Result<(), HandlerError> {
        let out = self.run(dir, &["checkout", "-b", branch]).await?;
        Self::check(&out, "checkout -b")
    }

    async fn commit_all(&self, dir: &Path, message: &str) -> Result<String, HandlerError> {
        let add_out = self.run(dir, &["add", "-A"]).await?;
        Self::check(&add_out, "add")?;

        let commit_out = self.run(dir, &["commit", "-m", message]).await?;
        Self::check(&commit_out, "commit")?;

        let rev_out = self.run(dir, &["rev-parse", "HEAD"]).await?;
        Self::check(&rev_out, "rev-parse")?;
        let sha = String::from_utf8_lossy(&rev_out.stdout).trim().to_string();
        Ok(sha)
    }

    async fn push(&self, dir: &Path, branch: &str) -> Result<(), HandlerError> {
        let out = self.run(dir, &["push", "origin", branch]).await?;
        Self::check(&out, "push")
    }
}

/// Per-build working directory convention (spec.md §6): `{work_root}/build-{id}/`.
pub fn working_directory(work_root: &str, build_id: i64) -> PathBuf {
    Path::new(work_root).join(format!("build-{build_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn working_directory_follows_convention() {
        let dir = working_directory("/work", 42);
        assert_eq!(dir, PathBuf::from("/work/build-42"));
    }
}
