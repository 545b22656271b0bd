//! Storage backends for the cache store.
//!
//! Backends move opaque byte records keyed by storage keys (hex digests
//! of logical keys). They know each entry's expiration instant so the
//! store can evict in expiration order, but never interpret the bytes.

use async_trait::async_trait;
use callguard_core::StorageError;
use chrono::{DateTime, Utc};

mod file;
mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use file::FileBackend;
pub use memory::MemoryBackend;
#[cfg(feature = "redis")]
pub use self::redis::RedisBackend;

/// Byte-oriented key-value storage with per-entry expiration metadata.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Insert or overwrite an entry.
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// Fetch an entry's bytes.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Remove an entry. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Check whether an entry exists, expired or not.
    async fn contains(&self, key: &str) -> Result<bool, StorageError>;

    /// All storage keys.
    async fn keys(&self) -> Result<Vec<String>, StorageError>;

    /// Every storage key with its expiration instant.
    async fn expirations(&self) -> Result<Vec<(String, DateTime<Utc>)>, StorageError>;

    /// Remove every entry. Returns the number removed.
    async fn clear(&self) -> Result<u64, StorageError>;

    /// Number of entries.
    async fn len(&self) -> Result<usize, StorageError> {
        Ok(self.keys().await?.len())
    }
}
