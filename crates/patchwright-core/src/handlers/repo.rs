//! `repo`: clone the failing commit and cut a fix branch (spec.md topology
//! table: "Clone repo at commit, create fix branch"; §9, S6: a crashed
//! worker's partial checkout is cleaned before the clone re-runs).

use async_trait::async_trait;
use patchwright_db::models::Task;
use serde_json::json;

use crate::handlers::{Handler, HandlerContext};
use crate::outcome::{ErrorKind, Outcome};
use crate::workdir;

pub struct RepoHandler;

#[async_trait]
impl Handler for RepoHandler {
    async fn handle(&self, ctx: &HandlerContext, task: &Task) -> Outcome {
        let Some(repo_url) = task.payload.get("repo_url").and_then(|v| v.as_str()) else {
            return Outcome::Failed {
                message: "repo stage requires repo_url in payload".to_string(),
                metadata: json!({}),
            };
        };
        let Some(commit_sha) = task.payload.get("commit_sha").and_then(|v| v.as_str()) else {
            return Outcome::Failed {
                message: "repo stage requires commit_sha in payload".to_string(),
                metadata: json!({}),
            };
        };

        let dir = workdir::build_directory(&ctx.config.work_root, task.build_id);

        if dir.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                return Outcome::retry(
                    format!("failed to clean stale working directory {dir:?}: {e}"),
                    ErrorKind::Transient,
                );
            }
        }

        if let Err(e) = ctx.git.clone_repo(repo_url, commit_sha, &dir).await {
            return e.into_outcome();
        }

        let fix_branch = format!("ci-fix/{}", task.build_id);
        if let Err(e) = ctx.git.checkout_new_branch(&dir, &fix_branch).await {
            return e.into_outcome();
        }

        Outcome::completed_with(
            format!("cloned {repo_url}@{commit_sha} into {dir:?} on {fix_branch}"),
            json!({
                "working_directory": dir.to_string_lossy(),
                "fix_branch": fix_branch,
            }),
        )
    }
}
