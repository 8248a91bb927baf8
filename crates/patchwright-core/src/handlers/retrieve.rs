//! `retrieve`: scan the checked-out working copy and rank candidate files
//! against the parsed build log (spec.md topology table: "Rank candidate
//! files (stack-trace > spring-context > build files)").

use std::path::Path;

use async_trait::async_trait;
use patchwright_db::models::Task;
use patchwright_db::queries::candidate_files;
use tracing::warn;

use crate::analysis::{file_ranker, log_parser, project_analyzer};
use crate::handlers::{Handler, HandlerContext};
use crate::outcome::{ErrorKind, Outcome};

/// Only the top-ranked candidates are persisted; the `patch` stage's prompt
/// is bounded by what it can usefully include, not by how many files
/// matched at all.
const MAX_CANDIDATES: usize = 20;

pub struct RetrieveHandler;

#[async_trait]
impl Handler for RetrieveHandler {
    async fn handle(&self, ctx: &HandlerContext, task: &Task) -> Outcome {
        let Some(working_directory) = task.payload.get("working_directory").and_then(|v| v.as_str()) else {
            return Outcome::Failed {
                message: "retrieve stage requires working_directory in payload".to_string(),
                metadata: serde_json::json!({}),
            };
        };
        let build_logs = task
            .payload
            .get("build_logs")
            .and_then(|v| v.as_str())
            .unwrap_or("");

        let root = Path::new(working_directory);
        let structure = project_analyzer::analyze(root);
        let scanned = match project_analyzer::scan_files(root, &structure) {
            Ok(files) => files,
            Err(e) => {
                return Outcome::retry(format!("failed to scan {root:?}: {e}"), ErrorKind::Transient);
            }
        };

        let parsed = log_parser::parse(build_logs);
        let mut ranked = file_ranker::rank(&parsed, &scanned);

        if ranked.len() > MAX_CANDIDATES {
            warn!(
                build_id = task.build_id,
                total = ranked.len(),
                kept = MAX_CANDIDATES,
                "dropping lowest-ranked candidate files beyond the persisted cap"
            );
            ranked.truncate(MAX_CANDIDATES);
        }

        for candidate in &ranked {
            if let Err(e) = candidate_files::insert(
                &ctx.pool,
                task.build_id,
                &candidate.file_path,
                candidate.rank_score,
                Some(candidate.reason.as_str()),
            )
            .await
            {
                return Outcome::retry(format!("failed to persist candidate file: {e}"), ErrorKind::Transient);
            }
        }

        Outcome::completed(format!("ranked {} candidate file(s)", ranked.len()))
    }
}
