//! Database query functions for the `validations` table -- the append-only
//! artifact produced by the `validate` stage's recompile attempt.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::Validation;

/// Record the outcome of a compile (and optionally test) attempt.
pub async fn insert(
    pool: &PgPool,
    build_id: i64,
    passed: bool,
    output: Option<&str>,
) -> Result<Validation> {
    let row = sqlx::query_as::<_, Validation>(
        "INSERT INTO validations (build_id, passed, output) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(build_id)
    .bind(passed)
    .bind(output)
    .fetch_one(pool)
    .await
    .context("failed to insert validation")?;

    Ok(row)
}

/// List validations recorded for a build, oldest first.
pub async fn list_for_build(pool: &PgPool, build_id: i64) -> Result<Vec<Validation>> {
    let rows = sqlx::query_as::<_, Validation>(
        "SELECT * FROM validations WHERE build_id = $1 ORDER BY created_at ASC",
    )
    .bind(build_id)
    .fetch_all(pool)
    .await
    .context("failed to list validations for build")?;

    Ok(rows)
}
