//! # callguard-cache
//!
//! Expiring key-value cache with pluggable storage.
//!
//! ## Backends
//!
//! - [`MemoryBackend`]: process-local concurrent map
//! - [`FileBackend`]: one file per entry, expiration mirrored to mtime
//! - `RedisBackend`: external key-value server (feature `redis`)
//!
//! ## Example
//!
//! ```ignore
//! use callguard_cache::{CacheStore, Compression, FileBackend};
//! use std::time::Duration;
//!
//! let cache = CacheStore::builder(FileBackend::new("/var/cache/myapp"))
//!     .compression(Compression::gzip())
//!     .capacity(10_000)
//!     .build()?;
//!
//! cache.store("user_123", &user, Duration::from_secs(3600)).await?;
//! let user: Option<User> = cache.retrieve("user_123").await;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod backend;
pub mod compression;
pub mod record;
pub mod stats;
pub mod store;

#[cfg(feature = "redis")]
pub use backend::RedisBackend;
pub use backend::{CacheBackend, FileBackend, MemoryBackend};
pub use compression::{Compression, Compressor, GzipCompressor, NoCompression};
pub use record::CacheRecord;
pub use stats::CacheStats;
pub use store::{CacheStore, CacheStoreBuilder};
