//! # callguard-retries
//!
//! Retry executor with configurable backoff for callguard.
//!
//! ## Core Concepts
//!
//! - **[`RetryConfig`]**: attempts, backoff strategy, base delay, optional cap and jitter
//! - **[`BackoffStrategy`]**: how the delay grows between attempts
//! - **[`RetryExecutor`]**: runs an opaque async operation with retries
//! - **[`RetryOutcome`]**: success, fallback, exhaustion or cancellation
//!
//! ## Backoff Strategies
//!
//! - [`BackoffStrategy::Fixed`]: constant delay
//! - [`BackoffStrategy::Linear`]: delay grows by the base delay each attempt
//! - [`BackoffStrategy::Exponential`]: delay doubles each attempt
//!
//! ## Example
//!
//! ```ignore
//! use callguard_retries::{RetryConfig, RetryExecutor};
//! use std::time::Duration;
//!
//! let config = RetryConfig::new()
//!     .max_attempts(3)
//!     .exponential(Duration::from_millis(100));
//!
//! let outcome = RetryExecutor::new(config)
//!     .with_fallback(serde_json::Value::Null)
//!     .retry(|| async { call_api().await })
//!     .await;
//!
//! if outcome.is_fallback() {
//!     tracing::warn!(attempts = outcome.attempts(), "served fallback");
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod backoff;
pub mod config;
pub mod executor;

// Re-exports
pub use backoff::BackoffStrategy;
pub use config::RetryConfig;
pub use executor::{with_retry, AttemptInfo, RetryExecutor, RetryOutcome, RetryState};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::{with_retry, BackoffStrategy, RetryConfig, RetryExecutor, RetryOutcome};
}
