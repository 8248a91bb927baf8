//! The stage handler contract and registry (spec.md §4.4, §9 redesign note:
//! "express handlers as plain functions... registered in a kind -> handler
//! map at program start"). Each handler is a small `async_trait` object --
//! enough polymorphism to hold the seven implementations in one `HashMap`,
//! nothing more.

pub mod create_pr;
pub mod notify;
pub mod patch;
pub mod plan;
pub mod repo;
pub mod retrieve;
pub mod validate;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use patchwright_db::models::{StageKind, Task};
use sqlx::PgPool;

use crate::collaborators::{CodeHostClient, GitClient, LlmClient, MailTransport};
use crate::config::PipelineConfig;
use crate::outcome::Outcome;

/// Everything a handler needs beyond the task itself: the pool (for
/// persisting its artifact and running idempotence prechecks) and the
/// collaborators it may call out to.
pub struct HandlerContext {
    pub pool: PgPool,
    pub config: PipelineConfig,
    pub git: Arc<dyn GitClient>,
    pub llm: Arc<dyn LlmClient>,
    pub codehost: Arc<dyn CodeHostClient>,
    pub mail: Arc<dyn MailTransport>,
    /// Operator addresses the `notify` stage sends to; sourced from
    /// [`crate::collaborators::MailConfig::recipients`] and kept alongside
    /// (rather than inside) `config` since it is collaborator
    /// configuration, not part of the pipeline's own configuration surface.
    pub notify_recipients: Vec<String>,
}

/// `handle(task) -> outcome` (spec.md §4.4). A handler reads what it needs
/// from `task.payload`, does its work, persists its artifact row, and
/// returns an [`Outcome`] -- it never raises across this boundary.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &HandlerContext, task: &Task) -> Outcome;
}

/// `kind -> handler`, populated once at startup.
pub struct HandlerRegistry {
    handlers: HashMap<StageKind, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, kind: StageKind, handler: Arc<dyn Handler>) {
        self.handlers.insert(kind, handler);
    }

    pub fn get(&self, kind: StageKind) -> Option<&Arc<dyn Handler>> {
        self.handlers.get(&kind)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the registry with the seven production handlers wired to their
/// stage kinds, the registration order matching [`StageKind::ALL`].
pub fn default_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(StageKind::Plan, Arc::new(plan::PlanHandler));
    registry.register(StageKind::Repo, Arc::new(repo::RepoHandler));
    registry.register(StageKind::Retrieve, Arc::new(retrieve::RetrieveHandler));
    registry.register(StageKind::Patch, Arc::new(patch::PatchHandler));
    registry.register(StageKind::Validate, Arc::new(validate::ValidateHandler));
    registry.register(StageKind::CreatePr, Arc::new(create_pr::CreatePrHandler));
    registry.register(StageKind::Notify, Arc::new(notify::NotifyHandler));
    registry
}
