use super::CacheBackend;
use async_trait::async_trait;
use callguard_core::StorageError;
use chrono::{DateTime, Utc};
use filetime::FileTime;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

const EXTENSION: &str = "cache";

/// One file per entry under a directory.
///
/// Each entry lives at `<dir>/<key>.cache`. The entry's expiration instant
/// is mirrored into the file's modification time so eviction order can be
/// computed from directory metadata alone. Keys must be filesystem-safe;
/// the cache store only ever passes hex digests.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Create a backend rooted at `dir`. The directory is created on the
    /// first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{EXTENSION}"))
    }

    fn key_of(path: &Path) -> Option<String> {
        if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        if stem.starts_with('.') {
            return None;
        }
        Some(stem.to_string())
    }

    async fn entries(&self) -> Result<Vec<(String, PathBuf)>, StorageError> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut out = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if let Some(key) = Self::key_of(&path) {
                out.push((key, path));
            }
        }
        Ok(out)
    }
}

fn to_file_time(at: DateTime<Utc>) -> FileTime {
    FileTime::from_unix_time(at.timestamp(), at.timestamp_subsec_nanos())
}

#[async_trait]
impl CacheBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let target = self.path_for(key);
        let tmp = self
            .dir
            .join(format!(".{key}.{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, bytes).await?;

        let mtime = to_file_time(expires_at);
        let stamped = tmp.clone();
        let stamp = tokio::task::spawn_blocking(move || filetime::set_file_mtime(&stamped, mtime))
            .await
            .map_err(|e| StorageError::backend(e.to_string()))
            .and_then(|r| r.map_err(StorageError::from));

        // Never leave a temp file behind.
        let result = match stamp {
            Ok(()) => tokio::fs::rename(&tmp, &target).await.map_err(StorageError::from),
            Err(e) => Err(e),
        };
        if result.is_err() {
            let _ = tokio::fs::remove_file(&tmp).await;
        }
        result
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn contains(&self, key: &str) -> Result<bool, StorageError> {
        Ok(tokio::fs::try_exists(self.path_for(key)).await?)
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries().await?.into_iter().map(|(key, _)| key).collect())
    }

    async fn expirations(&self) -> Result<Vec<(String, DateTime<Utc>)>, StorageError> {
        let mut out = Vec::new();
        for (key, path) in self.entries().await? {
            let metadata = match tokio::fs::metadata(&path).await {
                Ok(metadata) => metadata,
                // Deleted between listing and stat.
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let mtime = FileTime::from_last_modification_time(&metadata);
            let at = DateTime::from_timestamp(mtime.unix_seconds(), mtime.nanoseconds())
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            out.push((key, at));
        }
        Ok(out)
    }

    async fn clear(&self) -> Result<u64, StorageError> {
        let mut removed = 0;
        for (key, path) in self.entries().await? {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            debug!(key = %key, "Removed cache file");
        }
        Ok(removed)
    }
}
