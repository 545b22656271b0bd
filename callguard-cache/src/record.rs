//! Persisted cache entry layout.

use crate::compression::Compressor;
use callguard_core::StorageError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A decoded cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord<T> {
    /// Logical key the entry was written under.
    pub key: String,
    /// Cached value.
    pub value: T,
    /// Absolute expiration instant.
    pub expires_at: DateTime<Utc>,
}

impl<T> CacheRecord<T> {
    /// Check whether the entry is expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Serialize)]
struct RecordRef<'a, T: ?Sized> {
    key: &'a str,
    value: &'a T,
    expires_at: DateTime<Utc>,
}

/// Serialize and compress a record.
pub(crate) fn encode<T>(
    compressor: &dyn Compressor,
    key: &str,
    value: &T,
    expires_at: DateTime<Utc>,
) -> Result<Vec<u8>, StorageError>
where
    T: Serialize + ?Sized,
{
    let json = serde_json::to_vec(&RecordRef {
        key,
        value,
        expires_at,
    })?;
    compressor.compress(&json)
}

/// Decompress and deserialize a record.
pub(crate) fn decode<T>(compressor: &dyn Compressor, bytes: &[u8]) -> Result<CacheRecord<T>, StorageError>
where
    T: DeserializeOwned,
{
    let json = compressor.decompress(bytes)?;
    Ok(serde_json::from_slice(&json)?)
}
