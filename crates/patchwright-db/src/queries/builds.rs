//! Database query functions for the `builds` table.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::{Build, BuildStatus};

/// Insert a new build in `processing` status.
///
/// Returns `Ok(None)` (rather than an error) if `(job, build_number)` already
/// exists, so the ingress handler can map that straight to HTTP 409 without
/// string-matching a database error.
pub async fn insert(
    pool: &PgPool,
    job: &str,
    build_number: i64,
    branch: &str,
    repo_url: &str,
    commit_sha: &str,
    payload: &serde_json::Value,
) -> Result<Option<Build>> {
    let build = sqlx::query_as::<_, Build>(
        "INSERT INTO builds (job, build_number, branch, repo_url, commit_sha, status, payload) \
         VALUES ($1, $2, $3, $4, $5, 'processing', $6) \
         ON CONFLICT (job, build_number) DO NOTHING \
         RETURNING *",
    )
    .bind(job)
    .bind(build_number)
    .bind(branch)
    .bind(repo_url)
    .bind(commit_sha)
    .bind(payload)
    .fetch_optional(pool)
    .await
    .context("failed to insert build")?;

    Ok(build)
}

/// Fetch a single build by ID.
pub async fn find(pool: &PgPool, build_id: i64) -> Result<Option<Build>> {
    let build = sqlx::query_as::<_, Build>("SELECT * FROM builds WHERE id = $1")
        .bind(build_id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch build")?;

    Ok(build)
}

/// Look up a build by its natural key, used by the ingress duplicate check.
pub async fn find_by_job_and_number(
    pool: &PgPool,
    job: &str,
    build_number: i64,
) -> Result<Option<Build>> {
    let build = sqlx::query_as::<_, Build>(
        "SELECT * FROM builds WHERE job = $1 AND build_number = $2",
    )
    .bind(job)
    .bind(build_number)
    .fetch_optional(pool)
    .await
    .context("failed to look up build by job and number")?;

    Ok(build)
}

/// List builds, optionally filtered by status, paginated.
pub async fn list(pool: &PgPool, status: Option<BuildStatus>, page: i64, size: i64) -> Result<Vec<Build>> {
    let offset = page.max(0) * size.max(1);
    let builds = match status {
        Some(status) => {
            sqlx::query_as::<_, Build>(
                "SELECT * FROM builds WHERE status = $1 \
                 ORDER BY created_at DESC OFFSET $2 LIMIT $3",
            )
            .bind(status)
            .bind(offset)
            .bind(size)
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as::<_, Build>(
                "SELECT * FROM builds ORDER BY created_at DESC OFFSET $1 LIMIT $2",
            )
            .bind(offset)
            .bind(size)
            .fetch_all(pool)
            .await
        }
    }
    .context("failed to list builds")?;

    Ok(builds)
}

/// Transition a build to a terminal state. Terminal states never revert, so
/// the `WHERE` clause only matches while the build is still `processing`.
pub async fn transition_terminal(pool: &PgPool, build_id: i64, to: BuildStatus) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE builds SET status = $1, updated_at = NOW() \
         WHERE id = $2 AND status = 'processing'",
    )
    .bind(to)
    .bind(build_id)
    .execute(pool)
    .await
    .context("failed to transition build status")?;

    Ok(result.rows_affected() > 0)
}

/// Reopen a build that had terminally failed back to `processing`, used when
/// an administrator retries all of its failed tasks.
pub async fn reopen(pool: &PgPool, build_id: i64) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE builds SET status = 'processing', updated_at = NOW() \
         WHERE id = $1 AND status = 'failed'",
    )
    .bind(build_id)
    .execute(pool)
    .await
    .context("failed to reopen build")?;

    Ok(result.rows_affected() > 0)
}

/// Count of builds grouped by status, for the admin `GET status` endpoint.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct BuildStatusCounts {
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
}

pub async fn count_by_status(pool: &PgPool) -> Result<BuildStatusCounts> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status::text, COUNT(*) FROM builds GROUP BY status")
            .fetch_all(pool)
            .await
            .context("failed to count builds by status")?;

    let mut counts = BuildStatusCounts::default();
    for (status, count) in rows {
        match status.as_str() {
            "processing" => counts.processing = count,
            "completed" => counts.completed = count,
            "failed" => counts.failed = count,
            _ => {}
        }
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_status_counts_default_is_zero() {
        let counts = BuildStatusCounts::default();
        assert_eq!(counts.processing, 0);
        assert_eq!(counts.completed, 0);
        assert_eq!(counts.failed, 0);
    }
}
