//! Database query functions for the `patches` table -- the append-only
//! artifact produced by the `patch` stage.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::Patch;

/// Record a unified diff generated (and possibly applied) for a build.
pub async fn insert(
    pool: &PgPool,
    build_id: i64,
    diff: &str,
    applied: bool,
    commit_sha: Option<&str>,
) -> Result<Patch> {
    let row = sqlx::query_as::<_, Patch>(
        "INSERT INTO patches (build_id, diff, applied, commit_sha) \
         VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(build_id)
    .bind(diff)
    .bind(applied)
    .bind(commit_sha)
    .fetch_one(pool)
    .await
    .context("failed to insert patch")?;

    Ok(row)
}

/// List patches recorded for a build, most recent last.
pub async fn list_for_build(pool: &PgPool, build_id: i64) -> Result<Vec<Patch>> {
    let rows = sqlx::query_as::<_, Patch>(
        "SELECT * FROM patches WHERE build_id = $1 ORDER BY created_at ASC",
    )
    .bind(build_id)
    .fetch_all(pool)
    .await
    .context("failed to list patches for build")?;

    Ok(rows)
}

/// Fetch the most recently recorded patch for a build, if any.
///
/// Used by the `validate` stage, which needs the diff that was just applied,
/// and by retries of the `patch` stage, which need to know whether a prior
/// attempt already committed something.
pub async fn latest_for_build(pool: &PgPool, build_id: i64) -> Result<Option<Patch>> {
    let row = sqlx::query_as::<_, Patch>(
        "SELECT * FROM patches WHERE build_id = $1 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(build_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch latest patch for build")?;

    Ok(row)
}
