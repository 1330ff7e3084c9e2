use std::time::Duration;

use backon::ExponentialBuilder;

use crate::constants::DEFAULT_SUBMIT_RETRIES;

/// What to do after a failed submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    Fail,
}

/// Bounded retry policy for rate-limited submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; zero disables retrying.
    pub max_retries: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_SUBMIT_RETRIES,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub const fn disabled() -> Self {
        Self {
            max_retries: 0,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Decide whether `attempt` (1-based count of failed attempts so far)
    /// may be retried. Only rate-limit failures are ever retried.
    pub fn decide(&self, attempt: u32, rate_limited: bool) -> RetryDecision {
        debug_assert!(attempt >= 1);
        if !rate_limited || attempt > self.max_retries {
            RetryDecision::Fail
        } else {
            RetryDecision::Retry
        }
    }

    /// Backoff builder bounded by this policy.
    pub fn backoff(&self) -> ExponentialBuilder {
        let max_delay = self.max_delay.max(self.min_delay);
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(max_delay)
            .with_max_times(self.max_retries as usize)
    }
}
