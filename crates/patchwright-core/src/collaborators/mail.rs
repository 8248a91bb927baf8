//! Mail transport (spec.md §1, "out of scope" collaborator): `send(to,
//! subject, html)`.
//!
//! The duplicate-notification precheck spec.md §4.4 requires lives against
//! the `notifications` table in [`crate::handlers::notify`], keyed by
//! `(build_id, notification_type)`, not here.

use async_trait::async_trait;
use serde::Serialize;

use crate::outcome::HandlerError;

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), HandlerError>;
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    /// Transactional-mail HTTP API endpoint.
    pub endpoint: String,
    pub api_key: String,
    pub from: String,
    /// Operator addresses notified on build completion/failure, joined with
    /// a comma for the `to` header when there is more than one.
    pub recipients: Vec<String>,
}

#[derive(Serialize)]
struct SendMailRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
}

pub struct HttpMailTransport {
    client: reqwest::Client,
    config: MailConfig,
}

impl HttpMailTransport {
    pub fn new(config: MailConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl MailTransport for HttpMailTransport {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), HandlerError> {
        let request = SendMailRequest {
            from: &self.config.from,
            to,
            subject,
            html,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| HandlerError::collaborator(format!("mail request failed: {e}"), true))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(HandlerError::collaborator(
                format!("mail transport returned {status}"),
                true,
            ));
        }
        if status.is_client_error() {
            return Err(HandlerError::collaborator(
                format!("mail transport rejected message: {status}"),
                false,
            ));
        }

        Ok(())
    }
}
