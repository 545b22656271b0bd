//! Window persistence across process restarts.

use async_trait::async_trait;
use callguard_core::StorageError;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// On-disk record: the ordered timestamp sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowRecord {
    /// Admission times, oldest first.
    pub timestamps: Vec<DateTime<Utc>>,
}

/// Trait for persisting a rate window.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Load the persisted timestamps, if any.
    async fn load(&self) -> Result<Option<Vec<DateTime<Utc>>>, StorageError>;

    /// Overwrite the persisted timestamps.
    async fn save(&self, timestamps: &[DateTime<Utc>]) -> Result<(), StorageError>;
}

/// In-memory window store.
#[derive(Debug, Default)]
pub struct MemoryWindowStore {
    record: RwLock<Option<Vec<DateTime<Utc>>>>,
}

impl MemoryWindowStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently persisted timestamps.
    pub fn persisted(&self) -> Option<Vec<DateTime<Utc>>> {
        self.record.read().clone()
    }
}

#[async_trait]
impl WindowStore for MemoryWindowStore {
    async fn load(&self) -> Result<Option<Vec<DateTime<Utc>>>, StorageError> {
        Ok(self.record.read().clone())
    }

    async fn save(&self, timestamps: &[DateTime<Utc>]) -> Result<(), StorageError> {
        *self.record.write() = Some(timestamps.to_vec());
        Ok(())
    }
}

/// File-based window store holding a single JSON record.
#[derive(Debug, Clone)]
pub struct FileWindowStore {
    path: PathBuf,
}

impl FileWindowStore {
    /// Create a store writing to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the record file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl WindowStore for FileWindowStore {
    async fn load(&self) -> Result<Option<Vec<DateTime<Utc>>>, StorageError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<WindowRecord>(&content) {
            Ok(record) => Ok(Some(record.timestamps)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Discarding unreadable rate window");
                Ok(None)
            }
        }
    }

    async fn save(&self, timestamps: &[DateTime<Utc>]) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let record = WindowRecord {
            timestamps: timestamps.to_vec(),
        };
        let content = serde_json::to_vec(&record)?;

        // Write then rename; readers never observe a partial record.
        let tmp = self
            .path
            .with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, content).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}
