//! `create_pr`: push the fix branch and open a pull request (spec.md
//! topology table: "Push fix branch, open PR"; §4.4's idempotence
//! requirement: precheck by head branch before calling the code host).

use async_trait::async_trait;
use patchwright_db::models::Task;
use patchwright_db::queries::pull_requests;

use crate::handlers::{Handler, HandlerContext};
use crate::outcome::{ErrorKind, Outcome};

pub struct CreatePrHandler;

#[async_trait]
impl Handler for CreatePrHandler {
    async fn handle(&self, ctx: &HandlerContext, task: &Task) -> Outcome {
        let Some(working_directory) = task.payload.get("working_directory").and_then(|v| v.as_str()) else {
            return Outcome::Failed {
                message: "create_pr stage requires working_directory in payload".to_string(),
                metadata: serde_json::json!({}),
            };
        };
        let Some(fix_branch) = task.payload.get("fix_branch").and_then(|v| v.as_str()) else {
            return Outcome::Failed {
                message: "create_pr stage requires fix_branch in payload".to_string(),
                metadata: serde_json::json!({}),
            };
        };
        let Some(repo_url) = task.payload.get("repo_url").and_then(|v| v.as_str()) else {
            return Outcome::Failed {
                message: "create_pr stage requires repo_url in payload".to_string(),
                metadata: serde_json::json!({}),
            };
        };
        let base_branch = task
            .payload
            .get("branch")
            .and_then(|v| v.as_str())
            .unwrap_or("main");

        match pull_requests::find_by_head_branch(&ctx.pool, task.build_id, fix_branch).await {
            Ok(Some(existing)) => {
                return Outcome::completed_with(
                    format!("pull request already exists for {fix_branch}"),
                    serde_json::json!({ "pull_request_url": existing.url }),
                );
            }
            Ok(None) => {}
            Err(e) => return Outcome::retry(format!("failed to check for existing pull request: {e}"), ErrorKind::Transient),
        }

        let Some(repo_slug) = repo_slug(repo_url) else {
            return Outcome::Failed {
                message: format!("could not determine owner/repo from repo_url {repo_url:?}"),
                metadata: serde_json::json!({}),
            };
        };

        if let Err(e) = ctx.git.push(std::path::Path::new(working_directory), fix_branch).await {
            return e.into_outcome();
        }

        let title = format!("ci-fix: build {}", task.build_id);
        let body = format!("Automated fix for build {} on {base_branch}.", task.build_id);

        let opened = match ctx
            .codehost
            .open_pull_request(&repo_slug, fix_branch, base_branch, &title, &body)
            .await
        {
            Ok(pr) => pr,
            Err(e) => return e.into_outcome(),
        };

        if let Err(e) = pull_requests::insert(
            &ctx.pool,
            task.build_id,
            &opened.external_id,
            fix_branch,
            base_branch,
            Some(&opened.url),
        )
        .await
        {
            return Outcome::retry(format!("failed to persist pull request: {e}"), ErrorKind::Transient);
        }

        Outcome::completed_with(
            format!("opened pull request {}", opened.url),
            serde_json::json!({ "pull_request_url": opened.url }),
        )
    }
}

/// Extract `owner/repo` from an HTTPS/`ssh://` URL or an `scp`-style
/// `user@host:owner/repo.git` remote.
fn repo_slug(repo_url: &str) -> Option<String> {
    let has_scheme = repo_url.contains("://");
    let without_scheme = repo_url.split_once("://").map(|(_, r)| r).unwrap_or(repo_url);
    let without_userinfo = without_scheme.rsplit_once('@').map(|(_, h)| h).unwrap_or(without_scheme);

    let path = if has_scheme {
        // `host/owner/repo` -- drop the host.
        without_userinfo.split_once('/').map(|(_, p)| p).unwrap_or("")
    } else {
        // scp-style `host:owner/repo` -- drop the host up to the colon.
        without_userinfo.split_once(':').map(|(_, p)| p).unwrap_or(without_userinfo)
    };

    let trimmed = path.trim_end_matches(".git").trim_matches('/');
    if trimmed.is_empty() || !trimmed.contains('/') {
        return None;
    }
    Some(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_slug_from_https_url() {
        assert_eq!(
            repo_slug("https://github.com/acme/svc.git"),
            Some("acme/svc".to_string())
        );
    }

    #[test]
    fn extracts_slug_from_ssh_url() {
        assert_eq!(
            repo_slug("ssh://git@github.com/acme/svc.git"),
            Some("acme/svc".to_string())
        );
    }

    #[test]
    fn extracts_slug_from_scp_like_ssh_url() {
        assert_eq!(
            repo_slug("git@github.com:acme/svc.git"),
            Some("acme/svc".to_string())
        );
    }

    #[test]
    fn rejects_url_with_no_path() {
        assert_eq!(repo_slug("https://github.com"), None);
    }
}
