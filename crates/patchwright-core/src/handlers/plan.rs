//! `plan`: parse the failing build's CI logs and record a fix plan
//! (spec.md topology table: "Parse build log, classify failure, draft fix
//! plan").

use async_trait::async_trait;
use patchwright_db::models::Task;
use patchwright_db::queries::plans;
use serde_json::json;

use crate::analysis::log_parser::{self, ParsedLog};
use crate::handlers::{Handler, HandlerContext};
use crate::outcome::Outcome;

pub struct PlanHandler;

#[async_trait]
impl Handler for PlanHandler {
    async fn handle(&self, ctx: &HandlerContext, task: &Task) -> Outcome {
        let build_logs = task
            .payload
            .get("build_logs")
            .and_then(|v| v.as_str())
            .unwrap_or("");

        let parsed = log_parser::parse(build_logs);
        let (summary, steps) = summarize(&parsed);

        if let Err(e) = plans::insert(&ctx.pool, task.build_id, &summary, &steps).await {
            return Outcome::retry(format!("failed to persist plan: {e}"), crate::outcome::ErrorKind::Transient);
        }

        Outcome::completed(summary)
    }
}

/// Turn a parsed log into an operator-readable summary and an ordered list
/// of investigation steps. A log with no actionable signal still produces a
/// plan row -- an empty `build_logs` field is not itself an error, it just
/// means the later stages have nothing but the repository to go on.
fn summarize(parsed: &ParsedLog) -> (String, serde_json::Value) {
    if parsed.is_empty() {
        return (
            "no stack trace or compiler error found in build logs; falling back to a repository-wide scan".to_string(),
            json!([]),
        );
    }

    let mut steps = Vec::new();

    if let Some(exception) = parsed.exception_types.first() {
        steps.push(format!("investigate {exception}"));
    }
    for frame in parsed.stack_frames.iter().take(5) {
        steps.push(format!(
            "inspect {}.{} ({}:{})",
            frame.class_name, frame.method, frame.file, frame.line
        ));
    }
    for err in &parsed.compiler_errors {
        steps.push(format!("fix compiler error at {}:{}: {}", err.file, err.line, err.message));
    }

    let summary = if !parsed.compiler_errors.is_empty() {
        format!("{} compiler error(s) found; patch should target the named files", parsed.compiler_errors.len())
    } else if let Some(exception) = parsed.exception_types.first() {
        format!("{exception} thrown; {} stack frame(s) implicate the fault location", parsed.stack_frames.len())
    } else {
        format!("{} stack frame(s) found with no named exception", parsed.stack_frames.len())
    };

    (summary, json!(steps))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_log_produces_fallback_plan() {
        let (summary, steps) = summarize(&ParsedLog::default());
        assert!(summary.contains("no stack trace"));
        assert_eq!(steps, json!([]));
    }

    #[test]
    fn compiler_error_drives_summary() {
        let parsed = log_parser::parse(
            "[ERROR] /repo/src/main/java/com/example/Foo.java:[12,5] cannot find symbol",
        );
        let (summary, steps) = summarize(&parsed);
        assert!(summary.contains("compiler error"));
        assert!(!steps.as_array().unwrap().is_empty());
    }

    #[test]
    fn exception_with_stack_frames_drives_summary() {
        let parsed = log_parser::parse(
            "java.lang.NullPointerException: boom\n\tat com.example.Foo.bar(Foo.java:10)\n",
        );
        let (summary, _) = summarize(&parsed);
        assert!(summary.contains("NullPointerException"));
    }
}
