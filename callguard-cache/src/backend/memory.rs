use super::CacheBackend;
use async_trait::async_trait;
use callguard_core::StorageError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct MemoryEntry {
    bytes: Arc<Vec<u8>>,
    expires_at: DateTime<Utc>,
}

/// Process-local backend backed by a concurrent map. Contents are lost
/// when the process exits.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: DashMap<String, MemoryEntry>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                bytes: Arc::new(bytes),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.get(key).map(|entry| entry.bytes.to_vec()))
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn contains(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.contains_key(key))
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries.iter().map(|e| e.key().clone()).collect())
    }

    async fn expirations(&self) -> Result<Vec<(String, DateTime<Utc>)>, StorageError> {
        Ok(self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().expires_at))
            .collect())
    }

    async fn clear(&self) -> Result<u64, StorageError> {
        let count = self.entries.len() as u64;
        self.entries.clear();
        Ok(count)
    }

    async fn len(&self) -> Result<usize, StorageError> {
        Ok(self.entries.len())
    }
}
