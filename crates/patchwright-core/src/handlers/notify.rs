//! `notify`: tell operators a build reached a terminal state (spec.md
//! topology table: "Notify stakeholders"; §4.4's idempotence requirement:
//! precheck by `(build_id, notification_type)` before sending mail).
//!
//! A task of this kind is reached two ways: by the normal topology (after
//! `create_pr` succeeds, a success notification), and directly, bypassing
//! the rest of the pipeline, when the dispatcher drives a build to terminal
//! failure from any other stage (a failure notification -- spec.md §9's
//! open question on the `validate -> notify` edge on a terminal failure is
//! resolved by routing every terminal failure straight to this handler; see
//! DESIGN.md).

use async_trait::async_trait;
use patchwright_db::models::Task;
use patchwright_db::queries::notifications;

use crate::handlers::{Handler, HandlerContext};
use crate::outcome::{ErrorKind, Outcome};
use crate::redact;

const TYPE_SUCCESS: &str = "success";
const TYPE_FAILURE: &str = "failure";

pub struct NotifyHandler;

#[async_trait]
impl Handler for NotifyHandler {
    async fn handle(&self, ctx: &HandlerContext, task: &Task) -> Outcome {
        let failure_reason = task.payload.get("failure_reason").and_then(|v| v.as_str());
        let notification_type = if failure_reason.is_some() { TYPE_FAILURE } else { TYPE_SUCCESS };

        match notifications::exists_for_build_and_type(&ctx.pool, task.build_id, notification_type).await {
            Ok(true) => return Outcome::completed(format!("{notification_type} notification already sent")),
            Ok(false) => {}
            Err(e) => return Outcome::retry(format!("failed to check for existing notification: {e}"), ErrorKind::Transient),
        }

        if ctx.notify_recipients.is_empty() {
            return Outcome::Failed {
                message: "notify stage has no configured recipients".to_string(),
                metadata: serde_json::json!({}),
            };
        }
        let to = ctx.notify_recipients.join(",");

        let subject = format!("build {} {}", task.build_id, notification_type);
        let html = render_body(task, notification_type, failure_reason, &ctx.config.signature_secret);

        let sent = match ctx.mail.send(&to, &subject, &html).await {
            Ok(()) => true,
            Err(e) if e.kind.is_retryable() => return e.into_outcome(),
            Err(_) => false,
        };

        if let Err(e) = notifications::insert(&ctx.pool, task.build_id, notification_type, &to, sent).await {
            return Outcome::retry(format!("failed to persist notification: {e}"), ErrorKind::Transient);
        }

        if sent {
            Outcome::completed(format!("sent {notification_type} notification to {to}"))
        } else {
            Outcome::Failed {
                message: format!("mail transport rejected {notification_type} notification"),
                metadata: serde_json::json!({}),
            }
        }
    }
}

fn render_body(task: &Task, notification_type: &str, failure_reason: Option<&str>, secret: &str) -> String {
    let pull_request_url = task.payload.get("pull_request_url").and_then(|v| v.as_str());
    let mut body = format!("<p>Build {} {notification_type}.</p>", task.build_id);
    if let Some(url) = pull_request_url {
        body.push_str(&format!("<p>Pull request: <a href=\"{url}\">{url}</a></p>"));
    }
    if let Some(reason) = failure_reason {
        body.push_str(&format!("<p>Reason: {}</p>", redact::redact(reason, secret)));
    }
    body
}
