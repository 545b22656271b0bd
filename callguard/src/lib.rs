//! # callguard
//!
//! A resilience layer for outbound API calls. Each call passes through:
//!
//! - **Rate limiting**: a sliding window decides whether the call may proceed
//! - **Caching**: an identical call within its TTL is answered from storage
//! - **Retries**: failures are retried with fixed, linear or exponential
//!   backoff, ending in a fallback value or an explicit error
//!
//! ## Quick Start
//!
//! ```ignore
//! use callguard::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     callguard::telemetry::init()?;
//!
//!     let orchestrator = RequestOrchestrator::builder(
//!         OrchestratorConfig::new()
//!             .max_attempts(3)
//!             .rate_limit(10, 1.0)
//!             .cache_ttl_seconds(600),
//!     )
//!     .transport(HttpTransport::new())
//!     .build()
//!     .await?;
//!
//!     let request = CallRequest::get("https://api.example.com/users").param("id", "123");
//!     match orchestrator.send(&request).await? {
//!         CallOutcome::Fresh { value, .. } | CallOutcome::Cached { value } => {
//!             println!("{}", value.text()?);
//!         }
//!         CallOutcome::Fallback { last_error, .. } => eprintln!("degraded: {last_error}"),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description | Default |
//! |---------|-------------|--------|
//! | `http` | `reqwest`-backed [`HttpTransport`] | ✅ |
//! | `redis` | Redis cache backend | ❌ |
//!
//! ## Architecture
//!
//! - [`callguard_core`] - errors, call identity, clock, transport
//! - [`callguard_cache`] - expiring cache store and backends
//! - [`callguard_ratelimit`] - sliding-window rate limiter
//! - [`callguard_retries`] - retry executor and backoff

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod orchestrator;
pub mod outcome;
pub mod telemetry;

// ============================================================================
// Crate Re-exports
// ============================================================================

/// Core types and errors.
pub use callguard_core as core;

/// Cache store and backends.
pub use callguard_cache as cache;

/// Rate limiting.
pub use callguard_ratelimit as ratelimit;

/// Retry execution.
pub use callguard_retries as retries;

// ============================================================================
// Flat Re-exports
// ============================================================================

pub use config::{OrchestratorConfig, RateLimitSettings};
pub use orchestrator::{OrchestratorBuilder, RequestOrchestrator};
pub use outcome::CallOutcome;

pub use callguard_core::{
    CallGuardError, CallRequest, Method, Payload, Result, StorageError, Transport, TransportError,
};

#[cfg(feature = "http")]
#[cfg_attr(docsrs, doc(cfg(feature = "http")))]
pub use callguard_core::HttpTransport;

pub use callguard_cache::{CacheStore, Compression, FileBackend, MemoryBackend};
#[cfg(feature = "redis")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
pub use callguard_cache::RedisBackend;

pub use callguard_ratelimit::{FileWindowStore, RateLimitConfig, RateLimiter};
pub use callguard_retries::{BackoffStrategy, RetryConfig, RetryExecutor, RetryOutcome};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::{
        BackoffStrategy, CacheStore, CallGuardError, CallOutcome, CallRequest, OrchestratorConfig,
        Payload, RateLimiter, RequestOrchestrator, RetryConfig, Transport,
    };

    #[cfg(feature = "http")]
    pub use crate::HttpTransport;
}
