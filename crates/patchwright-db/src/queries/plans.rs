//! Database query functions for the `plans` table -- the append-only
//! artifact produced by the `plan` stage.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::Plan;

/// Record a fix plan for a build. Append-only: plans are never updated.
pub async fn insert(
    pool: &PgPool,
    build_id: i64,
    summary: &str,
    steps: &serde_json::Value,
) -> Result<Plan> {
    let plan = sqlx::query_as::<_, Plan>(
        "INSERT INTO plans (build_id, summary, steps) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(build_id)
    .bind(summary)
    .bind(steps)
    .fetch_one(pool)
    .await
    .context("failed to insert plan")?;

    Ok(plan)
}

/// List all plans recorded for a build, oldest first.
pub async fn list_for_build(pool: &PgPool, build_id: i64) -> Result<Vec<Plan>> {
    let plans = sqlx::query_as::<_, Plan>(
        "SELECT * FROM plans WHERE build_id = $1 ORDER BY created_at ASC",
    )
    .bind(build_id)
    .fetch_all(pool)
    .await
    .context("failed to list plans for build")?;

    Ok(plans)
}
