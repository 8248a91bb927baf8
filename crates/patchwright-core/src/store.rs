//! The task store (spec.md §4.1): a durable FIFO-within-kind work queue
//! with at-most-one-in-progress semantics under concurrent workers.
//!
//! This is a thin contract layer over `patchwright_db::queries::tasks`,
//! which does the actual row-locking work. The store adds the two pieces
//! spec.md requires that are not single SQL statements: reclaiming
//! retry-ready and lease-expired tasks before a lease attempt, and treating
//! a reclaimed lease as a retry (already handled by `lease_next`'s
//! `attempt + 1`, since a reclaimed task re-enters `pending` and is leased
//! like any other).

use anyhow::{Context, Result};
use chrono::Duration as ChronoDuration;
use patchwright_db::models::{BuildStatus, StageKind, Task, TaskStatus};
use patchwright_db::queries::builds;
use patchwright_db::queries::tasks as db;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{error, warn};

use crate::topology;

#[derive(Clone)]
pub struct TaskStore {
    pool: PgPool,
    lease_timeout: ChronoDuration,
}

impl TaskStore {
    pub fn new(pool: PgPool, lease_timeout: ChronoDuration) -> Self {
        Self {
            pool,
            lease_timeout,
        }
    }

    /// `enqueue(build, kind, payload)` -- writes a Task with status
    /// `pending`, attempt 0.
    pub async fn enqueue(
        &self,
        build_id: i64,
        kind: StageKind,
        payload: &Value,
        max_attempts: i32,
    ) -> Result<Task> {
        db::enqueue(&self.pool, build_id, kind, payload, max_attempts).await
    }

    /// `lease_next(kind) -> task | none`, per spec.md §4.1: reclaims
    /// retry-ready and lease-expired tasks first so they are visible as
    /// `pending` candidates, then atomically leases the oldest eligible
    /// task of `kind`.
    pub async fn lease_next(&self, kind: StageKind) -> Result<Option<Task>> {
        db::reclaim_ready_retries(&self.pool)
            .await
            .context("failed to reclaim ready retries")?;

        let reclaimed = db::reclaim_expired_leases(&self.pool, self.lease_timeout)
            .await
            .context("failed to reclaim expired leases")?;
        for task_id in reclaimed.requeued {
            warn!(task_id, "reclaimed lease past timeout; prior worker's write (if any) will be discarded by fencing");
        }
        for task in reclaimed.exhausted {
            warn!(
                task_id = task.id,
                build_id = task.build_id,
                attempt = task.attempt,
                max_attempts = task.max_attempts,
                "lease expired with no attempts remaining; failing task and build instead of re-leasing"
            );
            if let Err(e) = self.fail_build(&task, "lease expired after exhausting attempts").await {
                error!(task_id = task.id, error = %e, "failed to fail build for exhausted expired lease");
            }
        }

        db::lease_next(&self.pool, kind).await
    }

    /// Transition the owning build to `failed` and, unless `task` is itself
    /// the `notify` stage, enqueue a direct `notify` task carrying
    /// `failure_reason` -- bypassing the rest of the topology so a
    /// terminal build failure always produces an operator-visible
    /// notification (spec.md §9's resolution of the terminal-failure
    /// notification question). Shared by [`Self::lease_next`] (exhausted
    /// expired leases) and the dispatcher (exhausted retries, terminal
    /// handler failures).
    pub async fn fail_build(&self, task: &Task, message: &str) -> Result<()> {
        builds::transition_terminal(&self.pool, task.build_id, BuildStatus::Failed)
            .await
            .context("failed to transition build to failed")?;

        if task.kind == StageKind::Notify {
            warn!(
                build_id = task.build_id,
                "notify stage itself failed terminally; no further notification will be sent"
            );
            return Ok(());
        }

        let payload = topology::propagate(&task.payload, &serde_json::json!({ "failure_reason": message }));
        self.enqueue(task.build_id, StageKind::Notify, &payload, 1)
            .await
            .context("failed to enqueue failure notification task")?;
        Ok(())
    }

    /// `find(task_id) -> task | none` -- read-only lookup for
    /// administrative operations.
    pub async fn find(&self, task_id: i64) -> Result<Option<Task>> {
        db::find(&self.pool, task_id).await
    }

    pub async fn list_for_build(&self, build_id: i64) -> Result<Vec<Task>> {
        db::list_for_build(&self.pool, build_id).await
    }

    pub async fn list(
        &self,
        status: Option<TaskStatus>,
        page: i64,
        size: i64,
    ) -> Result<Vec<Task>> {
        db::list(&self.pool, status, page, size).await
    }

    /// Mark a task `completed`, guarded by `lease_generation`. A stale
    /// write (from a worker whose lease has since been reclaimed) is
    /// silently discarded and logged, matching the fencing-token
    /// requirement of spec.md §5.
    pub async fn mark_completed(&self, task_id: i64, lease_generation: i32) -> Result<bool> {
        let applied = db::mark_completed(&self.pool, task_id, lease_generation).await?;
        if !applied {
            warn!(task_id, lease_generation, "discarded stale completion write (lease generation mismatch)");
        }
        Ok(applied)
    }

    pub async fn mark_failed(
        &self,
        task_id: i64,
        lease_generation: i32,
        error: &str,
    ) -> Result<bool> {
        let applied = db::mark_failed(&self.pool, task_id, lease_generation, error).await?;
        if !applied {
            warn!(task_id, lease_generation, "discarded stale failure write (lease generation mismatch)");
        }
        Ok(applied)
    }

    pub async fn schedule_retry(
        &self,
        task_id: i64,
        lease_generation: i32,
        delay: std::time::Duration,
        error: &str,
    ) -> Result<bool> {
        let delay = ChronoDuration::from_std(delay).unwrap_or(ChronoDuration::zero());
        let applied =
            db::schedule_retry(&self.pool, task_id, lease_generation, delay, error).await?;
        if !applied {
            warn!(task_id, lease_generation, "discarded stale retry write (lease generation mismatch)");
        }
        Ok(applied)
    }

    pub async fn merge_payload(&self, task_id: i64, payload: &Value) -> Result<()> {
        db::merge_payload(&self.pool, task_id, payload).await
    }

    /// Administrative override: reset a terminally `failed` task to
    /// `pending` with `attempt = 0`.
    pub async fn retry_failed_task(&self, task_id: i64) -> Result<bool> {
        db::retry_failed_task(&self.pool, task_id).await
    }

    pub async fn retry_all_failed_for_build(&self, build_id: i64) -> Result<u64> {
        db::retry_all_failed_for_build(&self.pool, build_id).await
    }

    pub async fn count_by_status(&self) -> Result<db::TaskStatusCounts> {
        db::count_by_status(&self.pool).await
    }

    pub async fn count_by_kind(&self) -> Result<Vec<(StageKind, i64)>> {
        db::count_by_kind(&self.pool).await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
