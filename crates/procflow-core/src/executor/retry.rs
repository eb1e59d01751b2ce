//! Retry policy applied around each task invocation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::ProcflowError;

/// How many times a task is attempted and how long to wait in between.
///
/// The default is a single attempt. Each retry gets a fresh effect id, so
/// attempts never share `io` paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first. Values below 1 behave like 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            multiplier: 1.0,
            max_backoff: Duration::ZERO,
        }
    }

    /// Constant back-off between attempts.
    pub fn fixed(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff: backoff,
            multiplier: 1.0,
            max_backoff: backoff,
        }
    }

    /// Doubling back-off capped at `max_backoff`.
    pub fn exponential(max_attempts: u32, initial: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff: initial,
            multiplier: 2.0,
            max_backoff,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay before attempt `attempt + 1`, where `attempt` is 1-based.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let cap = self.max_backoff.max(self.initial_backoff);
        let exp = attempt.saturating_sub(1).min(32) as i32;
        if exp == 0 || self.multiplier == 1.0 {
            return self.initial_backoff.min(cap);
        }
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exp);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(Duration::MAX)
            .min(cap)
    }

    /// Whether another attempt should follow `attempt` failing with `err`.
    pub fn should_retry(&self, attempt: u32, err: &ProcflowError) -> bool {
        attempt < self.attempts() && err.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec_err() -> ProcflowError {
        ProcflowError::TaskExecution {
            task: "t".into(),
            reason: "agent unavailable".into(),
        }
    }

    #[test]
    fn test_default_is_single_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts(), 1);
        assert!(!policy.should_retry(1, &exec_err()));
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy =
            RetryPolicy::exponential(5, Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(policy.backoff_after(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_after(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_after(3), Duration::from_millis(350));
        assert_eq!(policy.backoff_after(4), Duration::from_millis(350));
    }

    #[test]
    fn test_cancellation_is_never_retried() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(10));
        assert!(policy.should_retry(1, &exec_err()));
        assert!(!policy.should_retry(3, &exec_err()));
        assert!(!policy.should_retry(1, &ProcflowError::Cancelled));
    }
}
