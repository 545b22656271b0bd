//! Retry configuration.

use crate::backoff::{apply_jitter, BackoffStrategy};
use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// How the delay grows between attempts.
    pub strategy: BackoffStrategy,
    /// Initial delay, and the step for linear backoff.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Option<Duration>,
    /// Jitter factor (0.0 to 1.0). Zero keeps delays exact.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            strategy: BackoffStrategy::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: None,
            jitter: 0.0,
        }
    }
}

impl RetryConfig {
    /// Create a new default config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the total number of attempts.
    #[must_use]
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    /// Set the backoff strategy.
    #[must_use]
    pub fn strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the base delay.
    #[must_use]
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Use a fixed delay.
    #[must_use]
    pub fn fixed(self, delay: Duration) -> Self {
        self.strategy(BackoffStrategy::Fixed).base_delay(delay)
    }

    /// Use linear backoff stepping by `step`.
    #[must_use]
    pub fn linear(self, step: Duration) -> Self {
        self.strategy(BackoffStrategy::Linear).base_delay(step)
    }

    /// Use exponential backoff starting at `initial`.
    #[must_use]
    pub fn exponential(self, initial: Duration) -> Self {
        self.strategy(BackoffStrategy::Exponential).base_delay(initial)
    }

    /// Cap every delay at `max`.
    #[must_use]
    pub fn max_delay(mut self, max: Duration) -> Self {
        self.max_delay = Some(max);
        self
    }

    /// Set the jitter factor, clamped to 0.0..=1.0.
    #[must_use]
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Create config for API calls with sensible defaults.
    pub fn for_api() -> Self {
        Self::new()
            .max_attempts(4)
            .exponential(Duration::from_millis(500))
            .max_delay(Duration::from_secs(60))
            .jitter(0.1)
    }

    /// Create config that makes a single attempt.
    pub fn no_retry() -> Self {
        Self::new().max_attempts(1)
    }

    /// Delay to wait after the given failed attempt (1-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let mut delay = self.strategy.delay(self.base_delay, attempt);
        if let Some(max) = self.max_delay {
            delay = delay.min(max);
        }
        let delay = apply_jitter(delay, self.jitter);
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}
