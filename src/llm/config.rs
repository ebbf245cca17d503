use std::time::Duration;
use tokio_retry::strategy::{ExponentialBackoff, FixedInterval, jitter};

/// Upper bound for a single computed backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Configuration for LLM retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt (0 disables retrying).
    pub max_attempts: usize,
    /// Delay before the first retry; later delays grow from it.
    pub base_delay: Duration,
    pub strategy: RetryStrategy,
    /// Whether to only retry on rate limit (429) errors.
    pub only_retry_rate_limits: bool,
}

/// Retry strategy for handling failed LLM requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    Fixed,
    ExponentialBackoff,
    /// Exponential backoff with jitter to avoid thundering herd
    ExponentialBackoffWithJitter,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            strategy: RetryStrategy::ExponentialBackoffWithJitter,
            only_retry_rate_limits: true,
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: usize, base_delay: Duration, strategy: RetryStrategy) -> Self {
        Self {
            max_attempts,
            base_delay,
            strategy,
            only_retry_rate_limits: true,
        }
    }

    /// Retries every error, not just rate limits.
    pub fn retry_all_errors(mut self) -> Self {
        self.only_retry_rate_limits = false;
        self
    }

    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            base_delay: Duration::from_millis(0),
            strategy: RetryStrategy::Fixed,
            only_retry_rate_limits: true,
        }
    }

    /// The sleep before each retry, at most `max_attempts` of them.
    pub fn delays(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        let base_ms = self.base_delay.as_millis() as u64;
        let attempts = self.max_attempts;
        // 2f, 4f, 8f, ... halved gives f, 2f, 4f, ... without rounding odd bases.
        let doubling = ExponentialBackoff::from_millis(2)
            .factor(base_ms.max(1))
            .max_delay(MAX_BACKOFF * 2)
            .map(|delay| delay / 2);
        match self.strategy {
            RetryStrategy::Fixed => Box::new(FixedInterval::from_millis(base_ms).take(attempts)),
            RetryStrategy::ExponentialBackoff => Box::new(doubling.take(attempts)),
            RetryStrategy::ExponentialBackoffWithJitter => {
                Box::new(doubling.map(jitter).take(attempts))
            }
        }
    }
}
