//! Exponential backoff for transport failures.

use crate::defaults;
use std::time::Duration;

/// Backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub initial: Duration,
    /// Ceiling for any single delay.
    pub max: Duration,
    /// Consecutive failures before the sequence is declared exhausted.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(defaults::INITIAL_BACKOFF_MS),
            max: Duration::from_millis(defaults::MAX_BACKOFF_MS),
            max_attempts: defaults::MAX_RETRY_ATTEMPTS,
        }
    }
}

/// What to do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStep {
    /// Wait this long, then retry.
    Retry(Duration),
    /// Too many consecutive failures: wait the ceiling, the sequence restarts.
    Exhausted(Duration),
}

impl BackoffStep {
    pub fn delay(&self) -> Duration {
        match *self {
            BackoffStep::Retry(delay) | BackoffStep::Exhausted(delay) => delay,
        }
    }
}

/// Counts consecutive failures and produces doubling, capped delays.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    failures: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    /// Records a failure and returns how long to wait.
    pub fn on_failure(&mut self) -> BackoffStep {
        self.failures += 1;
        if self.failures >= self.policy.max_attempts.max(1) {
            self.failures = 0;
            return BackoffStep::Exhausted(self.policy.max);
        }
        let factor = 1u32.checked_shl(self.failures - 1).unwrap_or(u32::MAX);
        let delay = self
            .policy
            .initial
            .checked_mul(factor)
            .unwrap_or(self.policy.max)
            .min(self.policy.max);
        BackoffStep::Retry(delay)
    }

    /// Clears the failure count after a success.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Consecutive failures recorded so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}
