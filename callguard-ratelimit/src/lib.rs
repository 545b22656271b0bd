//! # callguard-ratelimit
//!
//! Sliding-window admission control for outbound calls.
//!
//! A [`RateLimiter`] admits at most `limit` calls in any trailing `window`.
//! Two admission modes are offered and kept distinct:
//!
//! - [`RateLimiter::allow_request`]: non-blocking, returns `false` when full
//! - [`RateLimiter::acquire`]: blocking, sleeps until the oldest admission
//!   leaves the window, then re-evaluates (bounded loop, cancellable)
//!
//! The window can be persisted across restarts through a [`WindowStore`].
//!
//! ## Example
//!
//! ```ignore
//! use callguard_ratelimit::{FileWindowStore, RateLimitConfig, RateLimiter};
//! use std::time::Duration;
//!
//! let limiter = RateLimiter::builder(RateLimitConfig::new(10, Duration::from_secs(1)))
//!     .store(FileWindowStore::new("/var/lib/myapp/limiter.json"))
//!     .build()
//!     .await?;
//!
//! if limiter.allow_request().await? {
//!     // proceed
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod limiter;
pub mod persistence;
pub mod window;

pub use limiter::{RateLimitConfig, RateLimiter, RateLimiterBuilder};
pub use persistence::{FileWindowStore, MemoryWindowStore, WindowRecord, WindowStore};
pub use window::RateWindow;
