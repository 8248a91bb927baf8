//! Database query functions for the `candidate_files` table -- the
//! append-only artifact produced by the `retrieve` stage's file ranker.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::CandidateFile;

/// Record a ranked candidate file for a build.
pub async fn insert(
    pool: &PgPool,
    build_id: i64,
    file_path: &str,
    rank_score: f64,
    reason: Option<&str>,
) -> Result<CandidateFile> {
    let row = sqlx::query_as::<_, CandidateFile>(
        "INSERT INTO candidate_files (build_id, file_path, rank_score, reason) \
         VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(build_id)
    .bind(file_path)
    .bind(rank_score)
    .bind(reason)
    .fetch_one(pool)
    .await
    .context("failed to insert candidate file")?;

    Ok(row)
}

/// List candidate files for a build, highest-ranked first.
///
/// Backed by the `candidate_files(build_id, rank_score desc)` index.
pub async fn list_for_build(pool: &PgPool, build_id: i64) -> Result<Vec<CandidateFile>> {
    let rows = sqlx::query_as::<_, CandidateFile>(
        "SELECT * FROM candidate_files WHERE build_id = $1 ORDER BY rank_score DESC",
    )
    .bind(build_id)
    .fetch_all(pool)
    .await
    .context("failed to list candidate files for build")?;

    Ok(rows)
}
