//! Database query functions for the `tasks` table -- the durable,
//! lease-based work queue at the center of the pipeline.

use chrono::{DateTime, Duration, Utc};
use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::{StageKind, Task, TaskStatus};

/// Insert a new pending task for `build_id` at attempt 0.
pub async fn enqueue(
    pool: &PgPool,
    build_id: i64,
    kind: StageKind,
    payload: &serde_json::Value,
    max_attempts: i32,
) -> Result<Task> {
    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks (build_id, kind, status, attempt, max_attempts, payload, lease_generation) \
         VALUES ($1, $2, 'pending', 0, $3, $4, 0) \
         RETURNING *",
    )
    .bind(build_id)
    .bind(kind)
    .bind(max_attempts)
    .bind(payload)
    .fetch_one(pool)
    .await
    .context("failed to enqueue task")?;

    Ok(task)
}

/// Fetch a single task by ID. Read-only; used by administrative operations.
pub async fn find(pool: &PgPool, task_id: i64) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
        .bind(task_id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task")?;

    Ok(task)
}

/// List tasks for a build, ordered by creation time.
pub async fn list_for_build(pool: &PgPool, build_id: i64) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE build_id = $1 ORDER BY created_at ASC",
    )
    .bind(build_id)
    .fetch_all(pool)
    .await
    .context("failed to list tasks for build")?;

    Ok(tasks)
}

/// List tasks across all builds, optionally filtered by status, paginated.
pub async fn list(
    pool: &PgPool,
    status: Option<TaskStatus>,
    page: i64,
    size: i64,
) -> Result<Vec<Task>> {
    let offset = page.max(0) * size.max(1);
    let tasks = match status {
        Some(status) => {
            sqlx::query_as::<_, Task>(
                "SELECT * FROM tasks WHERE status = $1 \
                 ORDER BY created_at ASC OFFSET $2 LIMIT $3",
            )
            .bind(status)
            .bind(offset)
            .bind(size)
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as::<_, Task>(
                "SELECT * FROM tasks ORDER BY created_at ASC OFFSET $1 LIMIT $2",
            )
            .bind(offset)
            .bind(size)
            .fetch_all(pool)
            .await
        }
    }
    .context("failed to list tasks")?;

    Ok(tasks)
}

/// Atomically lease the oldest `pending` task of `kind`, incrementing its
/// attempt counter and fencing-token (lease generation) and transitioning it
/// to `in_progress`.
///
/// Uses `FOR UPDATE SKIP LOCKED` so that concurrent callers racing for the
/// same kind never observe the same task: a contended row is simply skipped
/// by the loser, who sees no eligible task this tick rather than blocking.
///
/// Callers must run [`reclaim_ready_retries`] and [`reclaim_expired_leases`]
/// beforehand so that retry-ready and orphaned tasks are visible as
/// `pending` candidates.
pub async fn lease_next(pool: &PgPool, kind: StageKind) -> Result<Option<Task>> {
    let mut tx = pool.begin().await.context("failed to begin lease transaction")?;

    let candidate: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM tasks \
         WHERE kind = $1 AND status = 'pending' \
         ORDER BY created_at ASC \
         LIMIT 1 \
         FOR UPDATE SKIP LOCKED",
    )
    .bind(kind)
    .fetch_optional(&mut *tx)
    .await
    .context("failed to select next task")?;

    let Some((task_id,)) = candidate else {
        tx.commit().await.ok();
        return Ok(None);
    };

    let task = sqlx::query_as::<_, Task>(
        "UPDATE tasks \
         SET status = 'in_progress', \
             attempt = attempt + 1, \
             lease_generation = lease_generation + 1, \
             updated_at = NOW() \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(task_id)
    .fetch_one(&mut *tx)
    .await
    .context("failed to lease task")?;

    tx.commit().await.context("failed to commit lease")?;

    Ok(Some(task))
}

/// Flip `retry` tasks whose `ready_at` has passed back to `pending`, making
/// them visible to [`lease_next`].
///
/// Returns the number of tasks promoted.
pub async fn reclaim_ready_retries(pool: &PgPool) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'pending', updated_at = NOW() \
         WHERE status = 'retry' AND ready_at IS NOT NULL AND ready_at <= NOW()",
    )
    .execute(pool)
    .await
    .context("failed to reclaim ready retries")?;

    Ok(result.rows_affected())
}

/// Result of [`reclaim_expired_leases`]: tasks with attempts remaining are
/// requeued for re-lease; tasks that had already exhausted their attempts
/// when their lease expired are failed outright instead, since re-queuing
/// them would push `attempt` past `max_attempts` on the next lease and
/// violate the `tasks_attempt_bounds_check` constraint forever (the task
/// would be neither leasable nor terminal).
#[derive(Debug, Default)]
pub struct ReclaimedLeases {
    /// IDs of tasks flipped back to `pending`, re-leasable next tick.
    pub requeued: Vec<i64>,
    /// Tasks flipped straight to `failed` because their lease expired at
    /// `attempt == max_attempts`, with no attempts left to retry.
    pub exhausted: Vec<Task>,
}

/// Flip `in_progress` tasks whose lease has expired (`updated_at` older than
/// `lease_timeout`) back to `pending` so a crashed worker does not
/// permanently orphan its lease -- unless the task had already reached
/// `max_attempts`, in which case it is failed instead (see
/// [`ReclaimedLeases`]).
///
/// Requeued tasks have their `lease_generation` left untouched here; the
/// subsequent [`lease_next`] call increments it again, so a late write from
/// the original worker (still carrying the old generation) is detected as
/// stale by [`mark_completed`]/[`mark_failed`]/[`schedule_retry`] and
/// discarded.
pub async fn reclaim_expired_leases(pool: &PgPool, lease_timeout: Duration) -> Result<ReclaimedLeases> {
    let cutoff: DateTime<Utc> = Utc::now() - lease_timeout;

    let requeued: Vec<(i64,)> = sqlx::query_as(
        "UPDATE tasks \
         SET status = 'pending', updated_at = NOW() \
         WHERE status = 'in_progress' AND updated_at < $1 AND attempt < max_attempts \
         RETURNING id",
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await
    .context("failed to reclaim expired leases")?;

    let exhausted: Vec<Task> = sqlx::query_as::<_, Task>(
        "UPDATE tasks \
         SET status = 'failed', \
             last_error = 'lease expired after exhausting attempts', \
             updated_at = NOW() \
         WHERE status = 'in_progress' AND updated_at < $1 AND attempt >= max_attempts \
         RETURNING *",
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await
    .context("failed to fail exhausted expired leases")?;

    Ok(ReclaimedLeases {
        requeued: requeued.into_iter().map(|(id,)| id).collect(),
        exhausted,
    })
}

/// Mark a task `completed`, guarded by its lease generation.
///
/// Returns `true` if the write applied (the caller still held the current
/// lease), `false` if it was stale and was discarded.
pub async fn mark_completed(pool: &PgPool, task_id: i64, lease_generation: i32) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE tasks SET status = 'completed', last_error = NULL, updated_at = NOW() \
         WHERE id = $1 AND lease_generation = $2",
    )
    .bind(task_id)
    .bind(lease_generation)
    .execute(pool)
    .await
    .context("failed to mark task completed")?;

    Ok(result.rows_affected() > 0)
}

/// Mark a task `failed` with an error message, guarded by its lease generation.
pub async fn mark_failed(
    pool: &PgPool,
    task_id: i64,
    lease_generation: i32,
    error: &str,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE tasks SET status = 'failed', last_error = $1, updated_at = NOW() \
         WHERE id = $2 AND lease_generation = $3",
    )
    .bind(error)
    .bind(task_id)
    .bind(lease_generation)
    .execute(pool)
    .await
    .context("failed to mark task failed")?;

    Ok(result.rows_affected() > 0)
}

/// Schedule a retry: set status to `retry` with a `ready_at` timestamp
/// `delay` in the future, guarded by the task's lease generation.
pub async fn schedule_retry(
    pool: &PgPool,
    task_id: i64,
    lease_generation: i32,
    delay: Duration,
    error: &str,
) -> Result<bool> {
    let ready_at = Utc::now() + delay;

    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'retry', ready_at = $1, last_error = $2, updated_at = NOW() \
         WHERE id = $3 AND lease_generation = $4",
    )
    .bind(ready_at)
    .bind(error)
    .bind(task_id)
    .bind(lease_generation)
    .execute(pool)
    .await
    .context("failed to schedule task retry")?;

    Ok(result.rows_affected() > 0)
}

/// Overlay `metadata` onto the task's own payload and persist it, without
/// changing status. Used by handlers that need to accumulate payload state
/// across attempts of the same task (e.g. `previous_failure_reason`).
pub async fn merge_payload(pool: &PgPool, task_id: i64, payload: &serde_json::Value) -> Result<()> {
    sqlx::query("UPDATE tasks SET payload = $1, updated_at = NOW() WHERE id = $2")
        .bind(payload)
        .bind(task_id)
        .execute(pool)
        .await
        .context("failed to merge task payload")?;

    Ok(())
}

/// Administrative override: reset a terminally `failed` task to `pending`
/// with `attempt = 0`. The only sanctioned way a task re-enters the queue
/// once terminally failed.
///
/// Returns `true` if a row was reset (i.e. the task existed and was
/// `failed`).
pub async fn retry_failed_task(pool: &PgPool, task_id: i64) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'pending', attempt = 0, last_error = NULL, ready_at = NULL, updated_at = NOW() \
         WHERE id = $1 AND status = 'failed'",
    )
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to retry failed task")?;

    Ok(result.rows_affected() > 0)
}

/// Requeue every `failed` task belonging to a build (administrative
/// `POST builds/{id}/retry`). Returns the number of tasks reset.
pub async fn retry_all_failed_for_build(pool: &PgPool, build_id: i64) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'pending', attempt = 0, last_error = NULL, ready_at = NULL, updated_at = NOW() \
         WHERE build_id = $1 AND status = 'failed'",
    )
    .bind(build_id)
    .execute(pool)
    .await
    .context("failed to retry failed tasks for build")?;

    Ok(result.rows_affected())
}

/// Count of tasks grouped by status, for the admin `GET status`/`GET
/// queue/stats` endpoints.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TaskStatusCounts {
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub retry: i64,
    pub failed: i64,
}

pub async fn count_by_status(pool: &PgPool) -> Result<TaskStatusCounts> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status::text, COUNT(*) FROM tasks GROUP BY status")
            .fetch_all(pool)
            .await
            .context("failed to count tasks by status")?;

    let mut counts = TaskStatusCounts::default();
    for (status, count) in rows {
        match status.as_str() {
            "pending" => counts.pending = count,
            "in_progress" => counts.in_progress = count,
            "completed" => counts.completed = count,
            "retry" => counts.retry = count,
            "failed" => counts.failed = count,
            _ => {}
        }
    }
    Ok(counts)
}

/// Count of tasks grouped by stage kind, for the admin `GET status` endpoint.
pub async fn count_by_kind(pool: &PgPool) -> Result<Vec<(StageKind, i64)>> {
    let rows: Vec<(StageKind, i64)> =
        sqlx::query_as("SELECT kind, COUNT(*) FROM tasks GROUP BY kind")
            .fetch_all(pool)
            .await
            .context("failed to count tasks by kind")?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_counts_default_is_zero() {
        let counts = TaskStatusCounts::default();
        assert_eq!(counts.pending, 0);
        assert_eq!(counts.failed, 0);
    }
}
