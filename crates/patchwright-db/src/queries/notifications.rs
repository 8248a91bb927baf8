//! Database query functions for the `notifications` table -- the append-only
//! artifact produced by the `notify` stage, and by terminal-failure hooks.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::Notification;

/// Record an outbound notification for a build.
pub async fn insert(
    pool: &PgPool,
    build_id: i64,
    notification_type: &str,
    recipient: &str,
    sent: bool,
) -> Result<Notification> {
    let row = sqlx::query_as::<_, Notification>(
        "INSERT INTO notifications (build_id, notification_type, recipient, sent) \
         VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(build_id)
    .bind(notification_type)
    .bind(recipient)
    .bind(sent)
    .fetch_one(pool)
    .await
    .context("failed to insert notification")?;

    Ok(row)
}

/// Check whether a notification of `notification_type` already exists for a
/// build, keyed by `(build_id, kind)` per the duplicate-detection
/// requirement on write-side handlers.
pub async fn exists_for_build_and_type(
    pool: &PgPool,
    build_id: i64,
    notification_type: &str,
) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM notifications WHERE build_id = $1 AND notification_type = $2)",
    )
    .bind(build_id)
    .bind(notification_type)
    .fetch_one(pool)
    .await
    .context("failed to check for existing notification")?;

    Ok(exists)
}

/// List notifications recorded for a build.
pub async fn list_for_build(pool: &PgPool, build_id: i64) -> Result<Vec<Notification>> {
    let rows = sqlx::query_as::<_, Notification>(
        "SELECT * FROM notifications WHERE build_id = $1 ORDER BY created_at ASC",
    )
    .bind(build_id)
    .fetch_all(pool)
    .await
    .context("failed to list notifications for build")?;

    Ok(rows)
}
