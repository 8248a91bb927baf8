//! The working-directory retention sweep (spec.md §5), promoted from the
//! teacher's interactive `cleanup` command to an automatic background
//! ticker: a slower-cadence loop that deletes per-build working directories
//! once their build has reached a terminal state and aged past the
//! retention window, plus any directory with no matching build row at all.

use std::path::Path;

use patchwright_db::models::BuildStatus;
use patchwright_db::queries::builds;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::workdir;

/// How often the sweep runs. Retention is measured in days, so there is no
/// benefit to running this as often as the dispatcher's tick.
const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3_600);

pub async fn run(pool: PgPool, config: PipelineConfig, cancellation: CancellationToken) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = sweep(&pool, &config).await {
                    error!(error = %e, "cleanup sweep failed");
                }
            }
            _ = cancellation.cancelled() => {
                info!("cleanup ticker stopping");
                break;
            }
        }
    }
}

async fn sweep(pool: &PgPool, config: &PipelineConfig) -> anyhow::Result<()> {
    let root = Path::new(&config.work_root);
    if !root.is_dir() {
        return Ok(());
    }

    let now = chrono::Utc::now();
    let retention = config.retention();

    let mut entries = tokio::fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let dir_name = entry.file_name().to_string_lossy().to_string();

        let Some(build_id) = workdir::parse_build_id(&dir_name) else {
            continue;
        };

        let metadata = entry.metadata().await?;
        let modified: chrono::DateTime<chrono::Utc> = metadata.modified()?.into();

        let build = builds::find(pool, build_id).await?;
        let should_delete = match &build {
            None => {
                warn!(build_id, "working directory has no matching build row, treating as orphaned");
                workdir::is_expired(modified, now, retention)
            }
            Some(build) if build.status == BuildStatus::Processing => false,
            Some(_) => workdir::is_expired(modified, now, retention),
        };

        if should_delete {
            let path = entry.path();
            info!(build_id, ?path, "deleting expired working directory");
            tokio::fs::remove_dir_all(&path).await?;
        }
    }

    Ok(())
}
