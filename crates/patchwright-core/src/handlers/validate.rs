//! `validate`: recompile the patched working copy (spec.md topology table:
//! "Run build-system compile command, record pass/fail").

use std::path::Path;

use async_trait::async_trait;
use patchwright_db::models::Task;
use patchwright_db::queries::validations;
use tokio::process::Command;

use crate::analysis::project_analyzer;
use crate::handlers::{Handler, HandlerContext};
use crate::outcome::{ErrorKind, Outcome};

/// Compiler output beyond this size is truncated before being persisted,
/// so a runaway build log cannot blow out the `validations` row.
const MAX_OUTPUT_BYTES: usize = 65_536;

pub struct ValidateHandler;

#[async_trait]
impl Handler for ValidateHandler {
    async fn handle(&self, ctx: &HandlerContext, task: &Task) -> Outcome {
        let Some(working_directory) = task.payload.get("working_directory").and_then(|v| v.as_str()) else {
            return Outcome::Failed {
                message: "validate stage requires working_directory in payload".to_string(),
                metadata: serde_json::json!({}),
            };
        };

        let root = Path::new(working_directory);
        let structure = project_analyzer::analyze(root);
        let (program, args) = project_analyzer::compile_command(structure.build_system);

        let output = match Command::new(program).args(args).current_dir(root).output().await {
            Ok(o) => o,
            Err(e) => {
                return Outcome::retry(format!("failed to spawn {program}: {e}"), ErrorKind::Transient);
            }
        };

        let passed = output.status.success();
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        combined.truncate(combined.len().min(MAX_OUTPUT_BYTES));

        if let Err(e) = validations::insert(&ctx.pool, task.build_id, passed, Some(&combined)).await {
            return Outcome::retry(format!("failed to persist validation: {e}"), ErrorKind::Transient);
        }

        if passed {
            Outcome::completed("compile succeeded")
        } else {
            Outcome::retry(format!("compile failed: {combined}"), ErrorKind::Transient)
        }
    }
}
