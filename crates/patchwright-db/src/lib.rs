//! Persistence layer: connection pooling, migrations, and the row types and
//! query functions backing the task store and its per-stage artifacts.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;

pub use config::DbConfig;
pub use models::{
    Build, BuildStatus, CandidateFile, Notification, Patch, Plan, PullRequest, StageKind, Task,
    TaskStatus, Validation,
};
