//! The stage handler contract (spec.md §4.4, §7): handlers return a tagged
//! [`Outcome`] rather than raising exceptions across the dispatcher
//! boundary, and failures carry an [`ErrorKind`] the retry policy classifies
//! on.

use serde_json::Value;
use thiserror::Error;

/// What happened when a handler ran.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The stage finished. `metadata` is overlaid onto the task's payload
    /// (per the essential-key propagation rule) to build the successor's
    /// payload.
    Completed { message: String, metadata: Value },
    /// The stage should be re-attempted. The retry policy decides the
    /// delay (or gives up) based on the task's attempt count and the
    /// error's [`ErrorKind`].
    Retry { message: String, kind: ErrorKind },
    /// The stage -- and the owning build -- are done; no successor is
    /// enqueued.
    Failed { message: String, metadata: Value },
}

impl Outcome {
    pub fn completed(message: impl Into<String>) -> Self {
        Self::Completed {
            message: message.into(),
            metadata: Value::Object(Default::default()),
        }
    }

    pub fn completed_with(message: impl Into<String>, metadata: Value) -> Self {
        Self::Completed {
            message: message.into(),
            metadata,
        }
    }

    pub fn retry(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self::Retry {
            message: message.into(),
            kind,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            metadata: Value::Object(Default::default()),
        }
    }
}

/// The error taxonomy of spec.md §7. Kinds, not names: the retry policy
/// dispatches on this, not on the handler's error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or policy-violating external data. Non-retryable.
    Input,
    /// Storage contention, network hiccup, collaborator timeout.
    /// Retryable with backoff.
    Transient,
    /// A structured error from an external collaborator. Retryable if
    /// rate-limited or the collaborator returned 5xx; non-retryable for a
    /// 4xx auth/permission failure.
    Collaborator { retryable: bool },
    /// A policy guard tripped: dangerous diff, path escape, oversized
    /// payload. Non-retryable.
    Safety,
    /// A bug: null where unexpected, an invariant violated. Retried once by
    /// the dispatcher's uncaught-panic/error wrapper, then terminal.
    Internal,
}

impl ErrorKind {
    /// Whether this kind can ever justify a retry, independent of the
    /// attempt count. [`crate::retry::RetryPolicy::classify`] still checks
    /// `attempt >= max_attempts` on top of this.
    pub fn is_retryable(self) -> bool {
        match self {
            ErrorKind::Input | ErrorKind::Safety => false,
            ErrorKind::Transient | ErrorKind::Internal => true,
            ErrorKind::Collaborator { retryable } => retryable,
        }
    }
}

/// Error type handlers may surface via `?` before converting to
/// [`Outcome::Retry`]/[`Outcome::Failed`] at the handler boundary. Kept
/// separate from `anyhow::Error` so the [`ErrorKind`] travels with the
/// error instead of being inferred from a message.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
    pub kind: ErrorKind,
}

impl HandlerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Input, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn safety(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Safety, message)
    }

    pub fn collaborator(message: impl Into<String>, retryable: bool) -> Self {
        Self::new(ErrorKind::Collaborator { retryable }, message)
    }

    /// Convert into the outcome the dispatcher expects, choosing `Retry` or
    /// `Failed` based on whether this kind is ever retryable. The retry
    /// policy still has final say once attempt count is considered.
    pub fn into_outcome(self) -> Outcome {
        if self.kind.is_retryable() {
            Outcome::retry(self.message, self.kind)
        } else {
            Outcome::Failed {
                message: self.message,
                metadata: Value::Object(Default::default()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_and_safety_are_never_retryable() {
        assert!(!ErrorKind::Input.is_retryable());
        assert!(!ErrorKind::Safety.is_retryable());
    }

    #[test]
    fn transient_and_internal_are_retryable() {
        assert!(ErrorKind::Transient.is_retryable());
        assert!(ErrorKind::Internal.is_retryable());
    }

    #[test]
    fn collaborator_retryable_follows_flag() {
        assert!(ErrorKind::Collaborator { retryable: true }.is_retryable());
        assert!(!ErrorKind::Collaborator { retryable: false }.is_retryable());
    }

    #[test]
    fn handler_error_into_outcome_picks_retry_or_failed() {
        let retryable = HandlerError::transient("db down").into_outcome();
        assert!(matches!(retryable, Outcome::Retry { .. }));

        let terminal = HandlerError::safety("path escape").into_outcome();
        assert!(matches!(terminal, Outcome::Failed { .. }));
    }
}
