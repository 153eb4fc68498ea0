use crate::constants::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_BASE_DELAY_MS, DEFAULT_RETRY_JITTER,
    DEFAULT_RETRY_MAX_DELAY_MS, UNCLASSIFIED_MAX_ATTEMPTS,
};
use crate::fetcher::ErrorKind;
use rand::Rng;
use std::time::Duration;

/// Outcome of asking the policy about a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after the given delay
    Retry(Duration),
    /// Record the job as failed
    GiveUp,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per job, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Relative jitter applied to each delay, e.g. `0.2` for ±20%
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_RETRY_MAX_DELAY_MS),
            jitter: DEFAULT_RETRY_JITTER,
        }
    }
}

impl RetryPolicy {
    /// Nominal backoff after the `attempt`-th failure (1-based), without jitter.
    ///
    /// Formula: `min(base * 2^(attempt - 1), max_delay)`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(2_u32.pow(exponent));
        delay.min(self.max_delay)
    }

    fn with_jitter(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
        delay.mul_f64(factor.max(0.0))
    }

    /// Decides whether attempt number `attempt` (1-based), which failed with `kind`,
    /// should be followed by another one.
    ///
    /// An expired session is retried immediately since the caller has just obtained a
    /// fresh one; unclassified failures get at most one retry.
    pub fn should_retry(&self, attempt: u32, kind: ErrorKind) -> RetryDecision {
        if !kind.is_transient() {
            return RetryDecision::GiveUp;
        }
        let limit = match kind {
            ErrorKind::Other => self.max_attempts.min(UNCLASSIFIED_MAX_ATTEMPTS),
            _ => self.max_attempts,
        };
        if attempt >= limit {
            return RetryDecision::GiveUp;
        }
        match kind {
            ErrorKind::SessionExpired => RetryDecision::Retry(Duration::ZERO),
            _ => RetryDecision::Retry(self.with_jitter(self.backoff(attempt))),
        }
    }
}
