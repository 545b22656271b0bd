//! Retry executor for running operations with retries.

use crate::config::RetryConfig;
use callguard_core::CallGuardError;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// State of a retry run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryState {
    /// Attempts made so far.
    pub attempt: u32,
    /// Last error message.
    pub last_error: Option<String>,
    /// Total time spent waiting.
    pub total_wait_time: Duration,
    /// History of attempts.
    pub history: Vec<AttemptInfo>,
}

impl RetryState {
    /// Delays observed between attempts, in order.
    pub fn delays(&self) -> Vec<Duration> {
        self.history
            .iter()
            .filter_map(|a| a.delay_before_next)
            .collect()
    }
}

/// Information about a single attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptInfo {
    /// Attempt number (1-indexed).
    pub attempt: u32,
    /// Whether it succeeded.
    pub success: bool,
    /// Error message if failed.
    pub error: Option<String>,
    /// Time waited after this attempt, if another one followed.
    pub delay_before_next: Option<Duration>,
}

/// Terminal outcome of a retry run.
///
/// Errors from the operation never escape: they become a later success, the
/// configured fallback, or an explicit terminal variant.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome<T> {
    /// The operation succeeded.
    Success {
        /// Result of the successful attempt.
        value: T,
        /// Attempt bookkeeping.
        state: RetryState,
    },
    /// Every attempt failed and the configured fallback was returned.
    Fallback {
        /// The fallback value.
        value: T,
        /// Attempt bookkeeping.
        state: RetryState,
    },
    /// Every attempt failed and no fallback is configured.
    Exhausted {
        /// Attempt bookkeeping.
        state: RetryState,
    },
    /// Cancellation was observed between attempts.
    Cancelled {
        /// Attempt bookkeeping.
        state: RetryState,
    },
}

impl<T> RetryOutcome<T> {
    /// Attempt bookkeeping.
    pub fn state(&self) -> &RetryState {
        match self {
            Self::Success { state, .. }
            | Self::Fallback { state, .. }
            | Self::Exhausted { state }
            | Self::Cancelled { state } => state,
        }
    }

    /// Number of times the operation was invoked.
    pub fn attempts(&self) -> u32 {
        self.state().attempt
    }

    /// Last failure message, if any attempt failed.
    pub fn last_error(&self) -> Option<&str> {
        self.state().last_error.as_deref()
    }

    /// Check if the operation itself succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Check if the fallback was returned.
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }

    /// Borrow the value (real or fallback).
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Success { value, .. } | Self::Fallback { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Convert into a `Result`, mapping exhaustion and cancellation to errors.
    ///
    /// A fallback is returned as `Ok`; use [`is_fallback`](Self::is_fallback)
    /// first when the distinction matters.
    pub fn into_result(self) -> Result<T, CallGuardError> {
        match self {
            Self::Success { value, .. } | Self::Fallback { value, .. } => Ok(value),
            Self::Exhausted { state } => Err(CallGuardError::exhausted(
                state.attempt,
                state.last_error.unwrap_or_default(),
            )),
            Self::Cancelled { .. } => Err(CallGuardError::Cancelled),
        }
    }
}

/// Re-invokes an operation with backoff until it succeeds or attempts run out.
///
/// # Example
///
/// ```ignore
/// use callguard_retries::{RetryConfig, RetryExecutor};
/// use std::time::Duration;
///
/// let executor = RetryExecutor::new(RetryConfig::new().fixed(Duration::from_millis(10)))
///     .with_fallback("offline".to_string());
/// let outcome = executor.retry(|| async { fetch().await }).await;
/// ```
#[derive(Debug, Clone)]
pub struct RetryExecutor<T> {
    config: RetryConfig,
    fallback: Option<T>,
    cancel: Option<CancellationToken>,
}

impl<T: Clone> RetryExecutor<T> {
    /// Create an executor without a fallback.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            fallback: None,
            cancel: None,
        }
    }

    /// Return `value` when attempts are exhausted.
    #[must_use]
    pub fn with_fallback(mut self, value: T) -> Self {
        self.fallback = Some(value);
        self
    }

    /// Set or clear the fallback.
    #[must_use]
    pub fn fallback(mut self, value: Option<T>) -> Self {
        self.fallback = value;
        self
    }

    /// Observe `token` before each attempt and during each wait.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Get a reference to the retry config.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` up to the configured number of attempts.
    pub async fn retry<F, Fut, E>(&self, operation: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.retry_with(operation, self.config.max_attempts).await
    }

    /// Run `operation` up to `max_attempts` times (a value of 0 is treated as 1).
    pub async fn retry_with<F, Fut, E>(&self, mut operation: F, max_attempts: u32) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let max_attempts = max_attempts.max(1);
        let mut state = RetryState::default();

        loop {
            if self.is_cancelled() {
                debug!(attempt = state.attempt, "Retry cancelled before attempt");
                return RetryOutcome::Cancelled { state };
            }

            state.attempt += 1;
            debug!(attempt = state.attempt, max_attempts, "Executing retry attempt");

            match operation().await {
                Ok(value) => {
                    state.history.push(AttemptInfo {
                        attempt: state.attempt,
                        success: true,
                        error: None,
                        delay_before_next: None,
                    });
                    return RetryOutcome::Success { value, state };
                }
                Err(error) => {
                    let message = error.to_string();
                    warn!(
                        attempt = state.attempt,
                        max_attempts,
                        error = %message,
                        "Attempt failed"
                    );
                    state.last_error = Some(message.clone());

                    if state.attempt >= max_attempts {
                        state.history.push(AttemptInfo {
                            attempt: state.attempt,
                            success: false,
                            error: Some(message),
                            delay_before_next: None,
                        });
                        break;
                    }

                    let wait = self.config.delay_for(state.attempt);
                    state.total_wait_time = state.total_wait_time.saturating_add(wait);
                    state.history.push(AttemptInfo {
                        attempt: state.attempt,
                        success: false,
                        error: Some(message),
                        delay_before_next: Some(wait),
                    });

                    debug!(
                        attempt = state.attempt,
                        wait_ms = wait.as_millis() as u64,
                        "Waiting before retry"
                    );

                    if !self.wait(wait).await {
                        debug!(attempt = state.attempt, "Retry cancelled during backoff");
                        return RetryOutcome::Cancelled { state };
                    }
                }
            }
        }

        match &self.fallback {
            Some(value) => {
                warn!(attempts = state.attempt, "Retries exhausted, returning fallback");
                RetryOutcome::Fallback {
                    value: value.clone(),
                    state,
                }
            }
            None => {
                warn!(
                    attempts = state.attempt,
                    error = state.last_error.as_deref().unwrap_or_default(),
                    "Retries exhausted"
                );
                RetryOutcome::Exhausted { state }
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    /// Sleep for `wait`; returns `false` if cancelled first.
    async fn wait(&self, wait: Duration) -> bool {
        match &self.cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => false,
                _ = sleep(wait) => true,
            },
            None => {
                sleep(wait).await;
                true
            }
        }
    }
}

/// Execute an operation with retries, returning the value or the terminal error.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, CallGuardError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    T: Clone,
    E: fmt::Display,
{
    RetryExecutor::new(config.clone())
        .retry(operation)
        .await
        .into_result()
}
