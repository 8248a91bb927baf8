//! The pipeline's configuration surface (spec.md §6).
//!
//! Every field here has a default matching the specification; the CLI layers
//! CLI flag > env var > config file > this default, the same resolution
//! chain the teacher uses for its database URL and token secret.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Fully resolved pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root directory under which per-build working copies are checked out.
    pub work_root: String,
    /// Days a build's working directory survives after the build reaches a
    /// terminal state, before the cleanup ticker deletes it.
    pub retention_days: i64,
    /// Maximum number of tasks the dispatcher may have in flight per stage
    /// kind at once.
    pub max_concurrent_per_kind: usize,
    /// Dispatcher tick period.
    pub tick_interval_ms: u64,
    /// Retry backoff base, in seconds: `delay = min(base * 2^attempt, max)`.
    pub retry_base_seconds: u64,
    /// Retry backoff cap, in seconds.
    pub retry_max_seconds: u64,
    /// Uniform jitter factor applied on top of the backoff, e.g. `0.1` for
    /// up to +10%.
    pub retry_jitter_factor: f64,
    /// How long an `in_progress` task may hold its lease before another
    /// worker may reclaim it.
    pub lease_timeout_seconds: i64,
    /// Whether the ingress webhook requires a valid HMAC signature header.
    pub signature_required: bool,
    /// Pre-shared secret used to verify the webhook signature. Required
    /// (and non-empty) when `signature_required` is set.
    pub signature_secret: String,
    /// Maximum allowed clock skew, in seconds, between the signed timestamp
    /// header and wall clock, to bound replay windows.
    pub signature_max_skew_seconds: i64,
    /// Maximum accepted size, in bytes, of the `build_logs` ingress field.
    pub max_log_bytes: usize,
    /// Default `max_attempts` assigned to a newly enqueued task.
    pub default_max_attempts: i32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_root: "/work".to_string(),
            retention_days: 7,
            max_concurrent_per_kind: 5,
            tick_interval_ms: 1_000,
            retry_base_seconds: 2,
            retry_max_seconds: 300,
            retry_jitter_factor: 0.1,
            lease_timeout_seconds: 900,
            signature_required: false,
            signature_secret: String::new(),
            signature_max_skew_seconds: 300,
            max_log_bytes: 1_048_576,
            default_max_attempts: 3,
        }
    }
}

impl PipelineConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_secs(self.retry_base_seconds)
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_secs(self.retry_max_seconds)
    }

    pub fn lease_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease_timeout_seconds)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days)
    }
}
