//! Exponential back-off for startup retries.
//!
//! Authentication and registration share one policy: a bounded number of
//! attempts with delays of `base_delay * multiplier^n`, capped at `max_delay`.
//! A `Retry-After` hint from the upstream stretches a delay but never
//! shortens it.

use std::time::Duration;

use domain::RetryPolicy;

/// Configuration for exponential back-off between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Upper bound for any single delay.
    pub max_delay: Duration,

    /// Growth factor between consecutive delays.
    pub multiplier: f64,
}

impl BackoffPolicy {
    /// Five attempts with 1s, 2s, 4s, 8s between them.
    pub const DEFAULT: Self = Self {
        max_attempts: 5,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
        multiplier: 2.0,
    };

    /// Creates a doubling policy with the default cap.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Self::DEFAULT
        }
    }

    /// Computes the delay before retry number `retry` (0-indexed).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = self.multiplier.powi(retry.min(i32::MAX as u32) as i32);
        let secs = self.base_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Computes the delay after the `failed_attempt`-th attempt (1-indexed)
    /// failed, honouring any minimum delay requested by the error.
    pub fn delay_after(&self, failed_attempt: u32, policy: &RetryPolicy) -> Duration {
        let computed = self.delay_for_retry(failed_attempt.saturating_sub(1));
        match policy {
            RetryPolicy::Retryable { after: Some(hint) } => computed.max(*hint),
            _ => computed,
        }
    }

    /// Returns `true` once `attempts` attempts have been made.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// Returns an iterator over every delay the policy can produce.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_attempts.saturating_sub(1)).map(|retry| self.delay_for_retry(retry))
    }

    /// Total time spent sleeping if every attempt fails.
    pub fn total_max_wait(&self) -> Duration {
        self.delays().sum()
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}
