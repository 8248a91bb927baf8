//! Code-hosting client (spec.md §1, "out of scope" collaborator):
//! `open_pull_request(repo, head, base, title, body) -> pr_id`.
//!
//! The `create_pr` handler must precheck for an existing open PR by head
//! branch (spec.md §4.4's idempotence requirement) before calling
//! `open_pull_request`; that precheck lives against the `pull_requests`
//! table in [`crate::handlers::create_pr`], not here -- this client only
//! talks to the remote code host.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::outcome::HandlerError;

#[derive(Debug, Clone)]
pub struct OpenedPullRequest {
    pub external_id: String,
    pub url: String,
}

#[async_trait]
pub trait CodeHostClient: Send + Sync {
    async fn open_pull_request(
        &self,
        repo: &str,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<OpenedPullRequest, HandlerError>;
}

#[derive(Debug, Clone)]
pub struct CodeHostConfig {
    /// GitHub-REST-shaped API base, e.g. `https://api.github.com`.
    pub api_base: String,
    pub token: String,
}

#[derive(Serialize)]
struct CreatePullRequestBody<'a> {
    title: &'a str,
    head: &'a str,
    base: &'a str,
    body: &'a str,
}

#[derive(Deserialize)]
struct CreatePullRequestResponse {
    number: i64,
    html_url: String,
}

/// Implements [`CodeHostClient`] against the GitHub REST API shape
/// (`POST /repos/{owner}/{repo}/pulls`).
pub struct GitHubCodeHostClient {
    client: reqwest::Client,
    config: CodeHostConfig,
}

impl GitHubCodeHostClient {
    pub fn new(config: CodeHostConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl CodeHostClient for GitHubCodeHostClient {
    async fn open_pull_request(
        &self,
        repo: &str,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<OpenedPullRequest, HandlerError> {
        let url = format!("{}/repos/{repo}/pulls", self.config.api_base);
        let request_body = CreatePullRequestBody {
            title,
            head,
            base,
            body,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.token)
            .header("User-Agent", "patchwright")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                HandlerError::collaborator(format!("code host request failed: {e}"), true)
            })?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(HandlerError::collaborator(
                format!("code host returned {status}"),
                true,
            ));
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(HandlerError::collaborator(
                format!("code host rejected credentials: {status}"),
                false,
            ));
        }
        if status.is_client_error() {
            return Err(HandlerError::collaborator(
                format!("code host rejected pull request: {status}"),
                false,
            ));
        }

        let parsed: CreatePullRequestResponse = response.json().await.map_err(|e| {
            HandlerError::collaborator(format!("malformed code host response: {e}"), false)
        })?;

        Ok(OpenedPullRequest {
            external_id: parsed.number.to_string(),
            url: parsed.html_url,
        })
    }
}
