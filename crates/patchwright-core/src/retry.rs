//! Retry policy (spec.md §4.2): decide, for a failed task, whether to
//! retry and when.

use std::time::Duration;

use rand::Rng;

use crate::outcome::ErrorKind;

/// What the dispatcher should do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// Re-attempt after `delay`.
    Retry { delay: Duration },
    /// Terminal: the task (and its owning build) is done.
    GiveUp,
}

/// Tunables for the backoff calculation; mirrors [`crate::config::PipelineConfig`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn new(base: Duration, max_delay: Duration, jitter_factor: f64) -> Self {
        Self {
            base,
            max_delay,
            jitter_factor,
        }
    }

    /// `classify(attempt, max_attempts, kind) -> Decision`, per spec.md §4.2:
    ///
    /// - `attempt >= max_attempts` always gives up.
    /// - A non-retryable [`ErrorKind`] always gives up, regardless of
    ///   remaining attempts.
    /// - Otherwise, retry after `min(base * 2^attempt, max_delay) * (1 + jitter)`
    ///   with `jitter` uniform in `[0, jitter_factor]`.
    ///
    /// `attempt` here is the task's 1-based count of executions so far
    /// (leasing increments it before the handler runs), so the just-failed
    /// execution is the `attempt - 1`th zero-based attempt the backoff
    /// formula is defined over; passing `attempt` itself would double every
    /// delay, including the first retry's (spec.md §8 S3: ~2s, not ~4s).
    pub fn classify(&self, attempt: i32, max_attempts: i32, kind: ErrorKind) -> Decision {
        if attempt >= max_attempts {
            return Decision::GiveUp;
        }
        if !kind.is_retryable() {
            return Decision::GiveUp;
        }
        Decision::Retry {
            delay: self.delay_for_attempt(attempt - 1),
        }
    }

    /// The backoff delay for a given attempt, jitter included. Exposed
    /// separately from [`Self::classify`] so callers (and tests) can reason
    /// about the monotonic-ignoring-jitter base curve.
    pub fn delay_for_attempt(&self, attempt: i32) -> Duration {
        let unjittered = self.base_delay_for_attempt(attempt);
        let jitter = rand::rng().random_range(0.0..=self.jitter_factor);
        unjittered.mul_f64(1.0 + jitter)
    }

    /// `min(base * 2^attempt, max_delay)`, with no jitter applied. Used by
    /// property tests to check monotonicity, which jitter would obscure.
    pub fn base_delay_for_attempt(&self, attempt: i32) -> Duration {
        let attempt = attempt.max(0) as u32;
        let scale = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        let scaled = self.base.saturating_mul(scale);
        scaled.min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn give_up_when_attempt_exhausted() {
        let policy = RetryPolicy::default();
        let decision = policy.classify(3, 3, ErrorKind::Transient);
        assert_eq!(decision, Decision::GiveUp);
    }

    #[test]
    fn give_up_on_non_retryable_kind_even_with_attempts_left() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.classify(0, 3, ErrorKind::Input), Decision::GiveUp);
        assert_eq!(policy.classify(0, 3, ErrorKind::Safety), Decision::GiveUp);
        assert_eq!(
            policy.classify(0, 3, ErrorKind::Collaborator { retryable: false }),
            Decision::GiveUp
        );
    }

    #[test]
    fn retries_transient_error_with_attempts_remaining() {
        let policy = RetryPolicy::default();
        let decision = policy.classify(0, 3, ErrorKind::Transient);
        assert!(matches!(decision, Decision::Retry { .. }));
    }

    /// spec.md §8 S3: a transient failure on the task's first execution
    /// (lease_next has incremented `attempt` to 1) must schedule a retry
    /// after ~`base` (2s), not `base * 2`.
    #[test]
    fn first_execution_retry_delay_is_base_not_doubled() {
        let policy = RetryPolicy::default();
        let Decision::Retry { delay } = policy.classify(1, 3, ErrorKind::Transient) else {
            panic!("expected Retry");
        };
        assert!(delay >= policy.base, "delay {delay:?} should be at least base {:?}", policy.base);
        assert!(
            delay <= policy.base.mul_f64(1.0 + policy.jitter_factor) + Duration::from_millis(1),
            "delay {delay:?} should not be doubled to ~{:?}",
            policy.base * 2
        );
    }

    #[test]
    fn base_delay_is_monotonic_up_to_the_cap() {
        let policy = RetryPolicy::default();
        let mut prev = policy.base_delay_for_attempt(0);
        for attempt in 1..10 {
            let next = policy.base_delay_for_attempt(attempt);
            assert!(next >= prev, "delay should not decrease with attempt");
            prev = next;
        }
    }

    #[test]
    fn base_delay_respects_cap() {
        let policy = RetryPolicy::default();
        let far_out = policy.base_delay_for_attempt(20);
        assert_eq!(far_out, policy.max_delay);
    }

    #[test]
    fn delay_for_attempt_applies_jitter_within_bounds() {
        let policy = RetryPolicy::default();
        let base = policy.base_delay_for_attempt(1);
        for _ in 0..50 {
            let jittered = policy.delay_for_attempt(1);
            assert!(jittered >= base);
            assert!(jittered <= base.mul_f64(1.0 + policy.jitter_factor) + Duration::from_millis(1));
        }
    }
}
