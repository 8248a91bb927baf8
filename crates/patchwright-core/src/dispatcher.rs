//! The dispatcher (spec.md §4.1/§4.4/§5): a single ticking scheduler that
//! leases ready tasks per stage kind under bounded concurrency, runs their
//! handler, and interprets the resulting [`Outcome`] into the next database
//! write -- a successor task, a retry, or a terminal build transition.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use patchwright_db::models::{BuildStatus, StageKind, Task};
use patchwright_db::queries::builds;
use sqlx::PgPool;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::PipelineConfig;
use crate::handlers::{HandlerContext, HandlerRegistry};
use crate::outcome::Outcome;
use crate::retry::{Decision, RetryPolicy};
use crate::store::TaskStore;
use crate::topology;

pub struct Dispatcher {
    store: TaskStore,
    pool: PgPool,
    registry: Arc<HandlerRegistry>,
    ctx: Arc<HandlerContext>,
    retry_policy: RetryPolicy,
    config: PipelineConfig,
    semaphores: HashMap<StageKind, Arc<Semaphore>>,
    ticking: AtomicBool,
}

impl Dispatcher {
    pub fn new(
        store: TaskStore,
        pool: PgPool,
        registry: HandlerRegistry,
        ctx: Arc<HandlerContext>,
        retry_policy: RetryPolicy,
        config: PipelineConfig,
    ) -> Arc<Self> {
        let semaphores = StageKind::ALL
            .into_iter()
            .map(|kind| (kind, Arc::new(Semaphore::new(config.max_concurrent_per_kind))))
            .collect();

        Arc::new(Self {
            store,
            pool,
            registry: Arc::new(registry),
            ctx,
            retry_policy,
            config,
            semaphores,
            ticking: AtomicBool::new(false),
        })
    }

    /// Run the ticking loop until `cancellation` fires.
    pub async fn run(self: Arc<Self>, cancellation: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.tick_interval());
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.clone().maybe_tick();
                }
                _ = cancellation.cancelled() => {
                    info!("dispatcher stopping");
                    break;
                }
            }
        }
    }

    /// Start a tick unless the previous one is still in flight.
    fn maybe_tick(self: Arc<Self>) {
        if self.ticking.swap(true, Ordering::SeqCst) {
            warn!("skipping dispatcher tick: previous tick has not finished");
            return;
        }
        tokio::spawn(async move {
            self.tick().await;
            self.ticking.store(false, Ordering::SeqCst);
        });
    }

    /// One scan across every stage kind: try to lease and spawn one task per
    /// kind that currently has a free concurrency slot.
    async fn tick(&self) {
        for kind in StageKind::ALL {
            let semaphore = self.semaphores[&kind].clone();
            let Ok(permit) = semaphore.try_acquire_owned() else {
                continue;
            };

            match self.store.lease_next(kind).await {
                Ok(Some(task)) => {
                    let store = self.store.clone();
                    let pool = self.pool.clone();
                    let registry = self.registry.clone();
                    let ctx = self.ctx.clone();
                    let retry_policy = self.retry_policy;
                    let default_max_attempts = self.config.default_max_attempts;

                    tokio::spawn(async move {
                        let _permit = permit;
                        execute(&store, &pool, registry.as_ref(), ctx.as_ref(), retry_policy, default_max_attempts, task).await;
                    });
                }
                Ok(None) => {}
                Err(e) => error!(%kind, error = %e, "failed to lease next task"),
            }
        }
    }
}

/// Run one task's handler and interpret the outcome.
async fn execute(
    store: &TaskStore,
    pool: &PgPool,
    registry: &HandlerRegistry,
    ctx: &HandlerContext,
    retry_policy: RetryPolicy,
    default_max_attempts: i32,
    task: Task,
) {
    let span = info_span!(
        "task",
        correlation_id = %format!("orch-{}-{}-{}", task.build_id, task.id, chrono::Utc::now().timestamp_millis()),
        build_id = task.build_id,
        task_id = task.id,
        kind = %task.kind,
        attempt = task.attempt,
    );

    async {
        let Some(handler) = registry.get(task.kind) else {
            error!("no handler registered for stage kind");
            let _ = store.mark_failed(task.id, task.lease_generation, "no handler registered").await;
            if let Err(e) = store.fail_build(&task, "no handler registered").await {
                error!(error = %e, "failed to fail build");
            }
            return;
        };

        let outcome = handler.handle(ctx, &task).await;
        interpret(store, pool, retry_policy, default_max_attempts, &task, outcome).await;
    }
    .instrument(span)
    .await;
}

async fn interpret(
    store: &TaskStore,
    pool: &PgPool,
    retry_policy: RetryPolicy,
    default_max_attempts: i32,
    task: &Task,
    outcome: Outcome,
) {
    match outcome {
        Outcome::Completed { message, metadata } => {
            info!(message = %message, "stage completed");
            let applied = match store.mark_completed(task.id, task.lease_generation).await {
                Ok(applied) => applied,
                Err(e) => {
                    error!(error = %e, "failed to mark task completed");
                    return;
                }
            };
            if !applied {
                return;
            }

            match topology::successor(task.kind) {
                Some(next_kind) => {
                    let next_payload = topology::propagate(&task.payload, &metadata);
                    if let Err(e) = store.enqueue(task.build_id, next_kind, &next_payload, default_max_attempts).await {
                        error!(error = %e, "failed to enqueue successor task");
                    }
                }
                None => {
                    if let Err(e) = builds::transition_terminal(pool, task.build_id, BuildStatus::Completed).await {
                        error!(error = %e, "failed to transition build to completed");
                    }
                }
            }
        }
        Outcome::Retry { message, kind } => {
            match retry_policy.classify(task.attempt, task.max_attempts, kind) {
                Decision::Retry { delay } => {
                    warn!(message = %message, delay_ms = delay.as_millis() as u64, "stage failed, retrying");
                    let merged = {
                        let mut obj = task.payload.as_object().cloned().unwrap_or_default();
                        obj.insert("previous_failure_reason".to_string(), serde_json::Value::String(message.clone()));
                        serde_json::Value::Object(obj)
                    };
                    if let Err(e) = store.merge_payload(task.id, &merged).await {
                        error!(error = %e, "failed to merge retry payload");
                    }
                    if let Err(e) = store.schedule_retry(task.id, task.lease_generation, delay, &message).await {
                        error!(error = %e, "failed to schedule retry");
                    }
                }
                Decision::GiveUp => {
                    warn!(message = %message, "stage failed, giving up");
                    if let Err(e) = store.mark_failed(task.id, task.lease_generation, &message).await {
                        error!(error = %e, "failed to mark task failed");
                    }
                    if let Err(e) = store.fail_build(task, &message).await {
                        error!(error = %e, "failed to fail build");
                    }
                }
            }
        }
        Outcome::Failed { message, .. } => {
            warn!(message = %message, "stage failed terminally");
            if let Err(e) = store.mark_failed(task.id, task.lease_generation, &message).await {
                error!(error = %e, "failed to mark task failed");
            }
            if let Err(e) = store.fail_build(task, &message).await {
                error!(error = %e, "failed to fail build");
            }
        }
    }
}
