//! Integration tests for the task store's leasing and fencing invariants
//! (spec.md §8 #2, leasing uniqueness; the fencing-discard boundary).
//!
//! Each test creates a unique temporary database inside a shared
//! containerized PostgreSQL instance (via testcontainers), runs migrations,
//! and drops it on completion so tests are fully isolated and idempotent.

use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgPool;

use patchwright_db::models::{StageKind, TaskStatus};
use patchwright_db::queries::{builds, tasks};

use patchwright_test_utils::{create_test_db, drop_test_db};

/// Helper: insert a build so tasks have a valid `build_id` to reference.
async fn test_build(pool: &PgPool, job: &str) -> i64 {
    let build = builds::insert(
        pool,
        job,
        1,
        "main",
        "https://git.example.com/x/svc.git",
        "abc1234",
        &serde_json::json!({}),
    )
    .await
    .expect("insert build should succeed")
    .expect("build should not be a duplicate");
    build.id
}

#[tokio::test]
async fn concurrent_lease_of_one_pending_task_yields_it_exactly_once() {
    let (pool, db_name) = create_test_db().await;
    let build_id = test_build(&pool, "svc-concurrent").await;

    let enqueued = tasks::enqueue(&pool, build_id, StageKind::Plan, &serde_json::json!({}), 3)
        .await
        .expect("enqueue should succeed");

    // Two callers race for the same kind; exactly one should observe the task.
    let (a, b) = tokio::join!(
        tasks::lease_next(&pool, StageKind::Plan),
        tasks::lease_next(&pool, StageKind::Plan),
    );
    let a = a.expect("lease_next should succeed");
    let b = b.expect("lease_next should succeed");

    let leased: Vec<_> = [a, b].into_iter().flatten().collect();
    assert_eq!(leased.len(), 1, "exactly one caller should have leased the task");
    assert_eq!(leased[0].id, enqueued.id);
    assert_eq!(leased[0].status, TaskStatus::InProgress);
    assert_eq!(leased[0].attempt, 1);
    assert_eq!(leased[0].lease_generation, 1);

    // No second pending task remains for this kind.
    let again = tasks::lease_next(&pool, StageKind::Plan)
        .await
        .expect("lease_next should succeed");
    assert!(again.is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn mark_completed_with_stale_lease_generation_is_discarded() {
    let (pool, db_name) = create_test_db().await;
    let build_id = test_build(&pool, "svc-stale-complete").await;

    tasks::enqueue(&pool, build_id, StageKind::Plan, &serde_json::json!({}), 3)
        .await
        .expect("enqueue should succeed");
    let leased = tasks::lease_next(&pool, StageKind::Plan)
        .await
        .expect("lease_next should succeed")
        .expect("task should be leasable");
    assert_eq!(leased.lease_generation, 1);

    // A write carrying the generation the task had *before* this lease
    // (as an orphaned worker's delayed write would) must not apply.
    let stale_generation = leased.lease_generation - 1;
    let applied = tasks::mark_completed(&pool, leased.id, stale_generation)
        .await
        .expect("mark_completed should not error");
    assert!(!applied, "stale-generation completion write must be discarded");

    let row = tasks::find(&pool, leased.id)
        .await
        .expect("find should succeed")
        .expect("task should exist");
    assert_eq!(row.status, TaskStatus::InProgress, "row must be untouched by the stale write");
    assert_eq!(row.lease_generation, 1);

    // The current generation's write still applies.
    let applied = tasks::mark_completed(&pool, leased.id, leased.lease_generation)
        .await
        .expect("mark_completed should not error");
    assert!(applied);

    let row = tasks::find(&pool, leased.id)
        .await
        .expect("find should succeed")
        .expect("task should exist");
    assert_eq!(row.status, TaskStatus::Completed);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn schedule_retry_with_stale_lease_generation_is_discarded() {
    let (pool, db_name) = create_test_db().await;
    let build_id = test_build(&pool, "svc-stale-retry").await;

    tasks::enqueue(&pool, build_id, StageKind::Plan, &serde_json::json!({}), 3)
        .await
        .expect("enqueue should succeed");
    let leased = tasks::lease_next(&pool, StageKind::Plan)
        .await
        .expect("lease_next should succeed")
        .expect("task should be leasable");

    let stale_generation = leased.lease_generation - 1;
    let applied = tasks::schedule_retry(
        &pool,
        leased.id,
        stale_generation,
        ChronoDuration::seconds(2),
        "transient error",
    )
    .await
    .expect("schedule_retry should not error");
    assert!(!applied, "stale-generation retry write must be discarded");

    let row = tasks::find(&pool, leased.id)
        .await
        .expect("find should succeed")
        .expect("task should exist");
    assert_eq!(row.status, TaskStatus::InProgress, "row must be untouched by the stale write");
    assert!(row.ready_at.is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn reclaim_expired_lease_is_re_leased_with_incremented_generation() {
    let (pool, db_name) = create_test_db().await;
    let build_id = test_build(&pool, "svc-expired-lease").await;

    tasks::enqueue(&pool, build_id, StageKind::Plan, &serde_json::json!({}), 3)
        .await
        .expect("enqueue should succeed");
    let leased = tasks::lease_next(&pool, StageKind::Plan)
        .await
        .expect("lease_next should succeed")
        .expect("task should be leasable");
    assert_eq!(leased.lease_generation, 1);
    assert_eq!(leased.attempt, 1);

    // Simulate a worker that crashed holding the lease well past its
    // timeout, by backdating `updated_at`.
    sqlx::query("UPDATE tasks SET updated_at = $1 WHERE id = $2")
        .bind(Utc::now() - ChronoDuration::minutes(30))
        .bind(leased.id)
        .execute(&pool)
        .await
        .expect("backdating updated_at should succeed");

    let reclaimed = tasks::reclaim_expired_leases(&pool, ChronoDuration::minutes(15))
        .await
        .expect("reclaim_expired_leases should succeed");
    assert_eq!(reclaimed.requeued, vec![leased.id]);
    assert!(reclaimed.exhausted.is_empty());

    let re_leased = tasks::lease_next(&pool, StageKind::Plan)
        .await
        .expect("lease_next should succeed")
        .expect("reclaimed task should be leasable again");
    assert_eq!(re_leased.id, leased.id);
    assert_eq!(re_leased.attempt, 2, "attempt increments again on re-lease");
    assert_eq!(
        re_leased.lease_generation, 2,
        "lease generation must advance so the orphaned worker's eventual write is fenced out"
    );

    // The orphaned worker's delayed write (still carrying generation 1)
    // is now stale and must be discarded.
    let applied = tasks::mark_completed(&pool, leased.id, 1)
        .await
        .expect("mark_completed should not error");
    assert!(!applied, "orphaned worker's write must be fenced out by the new generation");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn reclaim_expired_lease_at_max_attempts_fails_instead_of_requeuing() {
    let (pool, db_name) = create_test_db().await;
    let build_id = test_build(&pool, "svc-expired-exhausted").await;

    // max_attempts = 1: the single lease below is already its last attempt.
    tasks::enqueue(&pool, build_id, StageKind::Validate, &serde_json::json!({}), 1)
        .await
        .expect("enqueue should succeed");
    let leased = tasks::lease_next(&pool, StageKind::Validate)
        .await
        .expect("lease_next should succeed")
        .expect("task should be leasable");
    assert_eq!(leased.attempt, 1);
    assert_eq!(leased.max_attempts, 1);

    sqlx::query("UPDATE tasks SET updated_at = $1 WHERE id = $2")
        .bind(Utc::now() - ChronoDuration::minutes(30))
        .bind(leased.id)
        .execute(&pool)
        .await
        .expect("backdating updated_at should succeed");

    let reclaimed = tasks::reclaim_expired_leases(&pool, ChronoDuration::minutes(15))
        .await
        .expect("reclaim_expired_leases should succeed");
    assert!(reclaimed.requeued.is_empty(), "an attempt-exhausted lease must not be requeued");
    assert_eq!(reclaimed.exhausted.len(), 1);
    assert_eq!(reclaimed.exhausted[0].id, leased.id);

    let row = tasks::find(&pool, leased.id)
        .await
        .expect("find should succeed")
        .expect("task should exist");
    assert_eq!(row.status, TaskStatus::Failed, "exhausted expired lease must be terminal, not stuck in_progress");
    assert_eq!(row.attempt, 1, "attempt must stay within tasks_attempt_bounds_check, never incremented past max_attempts");

    // Never leasable again.
    let again = tasks::lease_next(&pool, StageKind::Validate)
        .await
        .expect("lease_next should succeed");
    assert!(again.is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn reclaim_ready_retries_only_promotes_past_ready_at() {
    let (pool, db_name) = create_test_db().await;
    let build_id = test_build(&pool, "svc-retry-ready").await;

    tasks::enqueue(&pool, build_id, StageKind::Plan, &serde_json::json!({}), 3)
        .await
        .expect("enqueue should succeed");
    let leased = tasks::lease_next(&pool, StageKind::Plan)
        .await
        .expect("lease_next should succeed")
        .expect("task should be leasable");

    tasks::schedule_retry(
        &pool,
        leased.id,
        leased.lease_generation,
        ChronoDuration::hours(1),
        "transient error",
    )
    .await
    .expect("schedule_retry should succeed");

    // Still far from ready: reclaim must not promote it, and it must not be
    // leasable yet.
    let promoted = tasks::reclaim_ready_retries(&pool)
        .await
        .expect("reclaim_ready_retries should succeed");
    assert_eq!(promoted, 0);
    let not_yet = tasks::lease_next(&pool, StageKind::Plan)
        .await
        .expect("lease_next should succeed");
    assert!(not_yet.is_none());

    // Move `ready_at` into the past, then it should be promoted and leasable.
    sqlx::query("UPDATE tasks SET ready_at = $1 WHERE id = $2")
        .bind(Utc::now() - ChronoDuration::seconds(1))
        .bind(leased.id)
        .execute(&pool)
        .await
        .expect("backdating ready_at should succeed");

    let promoted = tasks::reclaim_ready_retries(&pool)
        .await
        .expect("reclaim_ready_retries should succeed");
    assert_eq!(promoted, 1);

    let re_leased = tasks::lease_next(&pool, StageKind::Plan)
        .await
        .expect("lease_next should succeed")
        .expect("promoted retry should now be leasable");
    assert_eq!(re_leased.id, leased.id);
    assert_eq!(re_leased.attempt, 2);

    pool.close().await;
    drop_test_db(&db_name).await;
}
