//! Database query functions for the `pull_requests` table -- the append-only
//! artifact produced by the `create_pr` stage.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::PullRequest;

/// Record a pull request opened for a build.
pub async fn insert(
    pool: &PgPool,
    build_id: i64,
    external_id: &str,
    head_branch: &str,
    base_branch: &str,
    url: Option<&str>,
) -> Result<PullRequest> {
    let row = sqlx::query_as::<_, PullRequest>(
        "INSERT INTO pull_requests (build_id, external_id, head_branch, base_branch, url) \
         VALUES ($1, $2, $3, $4, $5) RETURNING *",
    )
    .bind(build_id)
    .bind(external_id)
    .bind(head_branch)
    .bind(base_branch)
    .bind(url)
    .fetch_one(pool)
    .await
    .context("failed to insert pull request")?;

    Ok(row)
}

/// Find an existing pull request recorded for a build by head branch.
///
/// The `create_pr` handler must precheck this before calling the code-host
/// collaborator, since handlers are not assumed idempotent and opening a PR
/// is an externally observable side effect.
pub async fn find_by_head_branch(
    pool: &PgPool,
    build_id: i64,
    head_branch: &str,
) -> Result<Option<PullRequest>> {
    let row = sqlx::query_as::<_, PullRequest>(
        "SELECT * FROM pull_requests WHERE build_id = $1 AND head_branch = $2",
    )
    .bind(build_id)
    .bind(head_branch)
    .fetch_optional(pool)
    .await
    .context("failed to look up pull request by head branch")?;

    Ok(row)
}

/// List pull requests recorded for a build.
pub async fn list_for_build(pool: &PgPool, build_id: i64) -> Result<Vec<PullRequest>> {
    let rows = sqlx::query_as::<_, PullRequest>(
        "SELECT * FROM pull_requests WHERE build_id = $1 ORDER BY created_at ASC",
    )
    .bind(build_id)
    .fetch_all(pool)
    .await
    .context("failed to list pull requests for build")?;

    Ok(rows)
}
