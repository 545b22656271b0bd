//! Expiring key-value store over a pluggable backend.

use crate::backend::{CacheBackend, MemoryBackend};
use crate::compression::{Compression, Compressor};
use crate::record::{self, CacheRecord};
use crate::stats::{CacheStats, StatsCounters};
use callguard_core::clock::saturating_add;
use callguard_core::{hash_key, system_clock, CallGuardError, SharedClock, StorageError};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-key async locks, dropped from the map once uncontended.
#[derive(Debug, Default)]
struct KeyLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyLocks {
    async fn lock(&self, key: &str) -> KeyGuard<'_> {
        let mutex = self.locks.entry(key.to_string()).or_default().value().clone();
        let guard = mutex.lock_owned().await;
        KeyGuard {
            locks: self,
            key: key.to_string(),
            guard: Some(guard),
        }
    }
}

struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Expiring cache over a [`CacheBackend`].
///
/// Logical keys are hashed with SHA-256 into storage keys. Values are
/// serialized to JSON together with their expiration instant, then run
/// through the configured [`Compressor`].
///
/// Reads never fail: expired, missing, undecodable and unreadable entries
/// all come back as `None`, and expired or undecodable entries are removed
/// on the way out.
///
/// With a capacity set, every write is followed by eviction of the entries
/// with the earliest expiration until the count is back within capacity.
/// The entry just written is never evicted by its own write.
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    compressor: Arc<dyn Compressor>,
    clock: SharedClock,
    capacity: Option<usize>,
    default_ttl: Duration,
    locks: KeyLocks,
    eviction: Mutex<()>,
    stats: StatsCounters,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("backend", &self.backend.name())
            .field("compressor", &self.compressor.name())
            .field("capacity", &self.capacity)
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl CacheStore {
    /// Create a builder for a store over `backend`.
    pub fn builder(backend: impl CacheBackend + 'static) -> CacheStoreBuilder {
        CacheStoreBuilder::new(Arc::new(backend))
    }

    /// Create a builder over a shared backend.
    pub fn shared(backend: Arc<dyn CacheBackend>) -> CacheStoreBuilder {
        CacheStoreBuilder::new(backend)
    }

    /// Unbounded, uncompressed in-memory store.
    pub fn in_memory() -> Self {
        Self {
            backend: Arc::new(MemoryBackend::new()),
            compressor: Compression::None.compressor(),
            clock: system_clock(),
            capacity: None,
            default_ttl: DEFAULT_TTL,
            locks: KeyLocks::default(),
            eviction: Mutex::new(()),
            stats: StatsCounters::default(),
        }
    }

    /// Underlying backend.
    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    /// Capacity bound, if any.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// TTL used by [`store_default`](Self::store_default).
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Activity counters.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// Number of stored entries, expired ones included.
    pub async fn len(&self) -> Result<usize, StorageError> {
        self.backend.len().await
    }

    /// Store `value` under `key` for `ttl`.
    ///
    /// A zero TTL produces an entry that is already expired.
    pub async fn store<T>(&self, key: &str, value: &T, ttl: Duration) -> Result<(), StorageError>
    where
        T: Serialize + ?Sized,
    {
        let storage_key = hash_key(key);
        let expires_at = saturating_add(self.clock.now(), ttl);
        let bytes = record::encode(self.compressor.as_ref(), key, value, expires_at)?;
        let size = bytes.len();

        {
            let _guard = self.locks.lock(&storage_key).await;
            self.backend.put(&storage_key, bytes, expires_at).await?;
        }
        self.stats.write();
        debug!(
            key,
            backend = self.backend.name(),
            bytes = size,
            ttl_ms = ttl.as_millis() as u64,
            "Cache write"
        );

        if let Some(capacity) = self.capacity {
            self.enforce_capacity(capacity, &storage_key).await?;
        }
        Ok(())
    }

    /// Store `value` under `key` for the default TTL.
    pub async fn store_default<T>(&self, key: &str, value: &T) -> Result<(), StorageError>
    where
        T: Serialize + ?Sized,
    {
        self.store(key, value, self.default_ttl).await
    }

    /// Fetch the live value stored under `key`.
    pub async fn retrieve<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let storage_key = hash_key(key);
        let _guard = self.locks.lock(&storage_key).await;

        let bytes = match self.backend.get(&storage_key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.stats.miss();
                return None;
            }
            Err(e) => {
                warn!(key, error = %e, "Cache read failed, treating as miss");
                self.stats.miss();
                return None;
            }
        };

        match record::decode::<T>(self.compressor.as_ref(), &bytes) {
            Ok(CacheRecord {
                value, expires_at, ..
            }) => {
                if self.clock.now() >= expires_at {
                    debug!(key, %expires_at, "Cache entry expired");
                    self.discard(&storage_key).await;
                    self.stats.expired(1);
                    self.stats.miss();
                    None
                } else {
                    self.stats.hit();
                    Some(value)
                }
            }
            Err(e) => {
                warn!(key, error = %e, "Discarding undecodable cache entry");
                self.discard(&storage_key).await;
                self.stats.corrupt();
                self.stats.miss();
                None
            }
        }
    }

    /// Check whether an entry is stored under `key` without decoding it.
    ///
    /// Expiry is not evaluated; a read error counts as absent.
    pub async fn exists(&self, key: &str) -> bool {
        match self.backend.contains(&hash_key(key)).await {
            Ok(found) => found,
            Err(e) => {
                warn!(key, error = %e, "Cache existence check failed");
                false
            }
        }
    }

    /// Remove the entry for `key`, or every entry when `key` is `None`.
    ///
    /// Returns the number of entries removed.
    pub async fn clear(&self, key: Option<&str>) -> Result<u64, StorageError> {
        match key {
            Some(key) => {
                let storage_key = hash_key(key);
                let _guard = self.locks.lock(&storage_key).await;
                let removed = self.backend.delete(&storage_key).await?;
                debug!(key, removed, "Cache entry cleared");
                Ok(u64::from(removed))
            }
            None => {
                let _evicting = self.eviction.lock().await;
                let removed = self.backend.clear().await?;
                info!(backend = self.backend.name(), removed, "Cache cleared");
                Ok(removed)
            }
        }
    }

    /// Remove every expired entry. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<u64, StorageError> {
        let now = self.clock.now();
        let expired: Vec<String> = self
            .backend
            .expirations()
            .await?
            .into_iter()
            .filter(|(_, expires_at)| now >= *expires_at)
            .map(|(key, _)| key)
            .collect();

        let mut removed = 0;
        for storage_key in expired {
            let _guard = self.locks.lock(&storage_key).await;
            if self.backend.delete(&storage_key).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            self.stats.expired(removed);
            debug!(removed, "Purged expired cache entries");
        }
        Ok(removed)
    }

    /// Spawn a task that calls [`purge_expired`](Self::purge_expired) every
    /// `interval` until `cancel` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Cache sweeper stopped");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if let Err(e) = store.purge_expired().await {
                            warn!(error = %e, "Cache sweep failed");
                        }
                    }
                }
            }
        })
    }

    async fn discard(&self, storage_key: &str) {
        if let Err(e) = self.backend.delete(storage_key).await {
            warn!(storage_key, error = %e, "Failed to remove cache entry");
        }
    }

    async fn enforce_capacity(&self, capacity: usize, keep: &str) -> Result<(), StorageError> {
        let _evicting = self.eviction.lock().await;

        let mut entries = self.backend.expirations().await?;
        if entries.len() <= capacity {
            return Ok(());
        }
        entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let mut excess = entries.len() - capacity;
        for (storage_key, expires_at) in entries {
            if excess == 0 {
                break;
            }
            if storage_key == keep {
                continue;
            }
            let _guard = self.locks.lock(&storage_key).await;
            if self.backend.delete(&storage_key).await? {
                self.stats.evicted();
                debug!(storage_key = %storage_key, %expires_at, "Evicted cache entry");
            }
            excess -= 1;
        }
        Ok(())
    }
}

const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Builder for [`CacheStore`].
pub struct CacheStoreBuilder {
    backend: Arc<dyn CacheBackend>,
    compression: Compression,
    clock: Option<SharedClock>,
    capacity: Option<usize>,
    default_ttl: Duration,
}

impl CacheStoreBuilder {
    fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            compression: Compression::None,
            clock: None,
            capacity: None,
            default_ttl: DEFAULT_TTL,
        }
    }

    /// Compress stored records.
    #[must_use]
    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Bound the number of stored entries.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// TTL for [`CacheStore::store_default`].
    #[must_use]
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Use `clock` for expiration.
    #[must_use]
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the store.
    pub fn build(self) -> Result<CacheStore, CallGuardError> {
        if self.capacity == Some(0) {
            return Err(CallGuardError::configuration(
                "cache capacity must be at least 1",
            ));
        }
        let compressor = self.compression.compressor();
        debug!(
            backend = self.backend.name(),
            compressor = compressor.name(),
            capacity = ?self.capacity,
            "Cache store initialized"
        );
        Ok(CacheStore {
            backend: self.backend,
            compressor,
            clock: self.clock.unwrap_or_else(system_clock),
            capacity: self.capacity,
            default_ttl: self.default_ttl,
            locks: KeyLocks::default(),
            eviction: Mutex::new(()),
            stats: StatsCounters::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FileBackend;
    use crate::compression::GzipCompressor;
    use callguard_core::ManualClock;
    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct User {
        name: String,
        age: u32,
    }

    fn john() -> User {
        User {
            name: "John Doe".to_string(),
            age: 30,
        }
    }

    enum Kind {
        Memory,
        File,
    }

    fn store_with(
        kind: Kind,
        capacity: Option<usize>,
    ) -> (Arc<ManualClock>, CacheStore, Option<tempfile::TempDir>) {
        let clock = Arc::new(ManualClock::starting_now());
        let (backend, dir): (Arc<dyn CacheBackend>, _) = match kind {
            Kind::Memory => (Arc::new(MemoryBackend::new()), None),
            Kind::File => {
                let dir = tempfile::tempdir().unwrap();
                (Arc::new(FileBackend::new(dir.path())), Some(dir))
            }
        };
        let mut builder = CacheStore::shared(backend)
            .compression(Compression::gzip())
            .clock(clock.clone());
        if let Some(capacity) = capacity {
            builder = builder.capacity(capacity);
        }
        (clock, builder.build().unwrap(), dir)
    }

    #[rstest]
    #[case::memory(Kind::Memory)]
    #[case::file(Kind::File)]
    #[tokio::test]
    async fn test_store_then_retrieve(#[case] kind: Kind) {
        let (_clock, store, _dir) = store_with(kind, None);

        store.store("user_123", &john(), Duration::from_secs(3600)).await.unwrap();

        assert_eq!(store.retrieve::<User>("user_123").await, Some(john()));
        assert!(store.exists("user_123").await);
        assert_eq!(store.retrieve::<User>("user_456").await, None);
    }

    #[rstest]
    #[case::memory(Kind::Memory)]
    #[case::file(Kind::File)]
    #[tokio::test]
    async fn test_expired_entry_is_miss_and_removed(#[case] kind: Kind) {
        let (clock, store, _dir) = store_with(kind, None);

        store.store("k", &json!("v"), Duration::from_secs(10)).await.unwrap();
        clock.advance(Duration::from_secs(9));
        assert_eq!(store.retrieve::<String>("k").await.as_deref(), Some("v"));

        clock.advance(Duration::from_secs(1));
        assert_eq!(store.retrieve::<String>("k").await, None);
        assert_eq!(store.len().await.unwrap(), 0);
        assert_eq!(store.stats().expired, 1);
    }

    #[tokio::test]
    async fn test_unbounded_ttl_saturates() {
        let (_clock, store, _dir) = store_with(Kind::Memory, None);

        store.store("forever", &john(), Duration::MAX).await.unwrap();

        assert_eq!(store.retrieve::<User>("forever").await, Some(john()));
        let expirations = store.backend().expirations().await.unwrap();
        assert_eq!(expirations[0].1, DateTime::<Utc>::MAX_UTC);
    }

    #[tokio::test]
    async fn test_write_failure_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let not_a_dir = dir.path().join("occupied");
        std::fs::write(&not_a_dir, b"plain file").unwrap();
        let store = CacheStore::builder(FileBackend::new(&not_a_dir)).build().unwrap();

        let result = store.store("k", &john(), Duration::from_secs(60)).await;

        assert!(result.is_err());
        assert_eq!(store.stats().writes, 0);
        assert_eq!(store.retrieve::<User>("k").await, None);
    }

    #[tokio::test]
    async fn test_exists_ignores_expiry() {
        let (clock, store, _dir) = store_with(Kind::Memory, None);
        store.store("k", &1, Duration::from_secs(1)).await.unwrap();
        clock.advance(Duration::from_secs(5));

        assert!(store.exists("k").await);
        assert_eq!(store.retrieve::<i32>("k").await, None);
        assert!(!store.exists("k").await);
    }

    #[tokio::test]
    async fn test_zero_ttl_is_immediately_expired() {
        let (_clock, store, _dir) = store_with(Kind::Memory, None);
        store.store("k", &1, Duration::ZERO).await.unwrap();
        assert_eq!(store.retrieve::<i32>("k").await, None);
    }

    #[rstest]
    #[case::memory(Kind::Memory)]
    #[case::file(Kind::File)]
    #[tokio::test]
    async fn test_capacity_evicts_earliest_expiration(#[case] kind: Kind) {
        let (_clock, store, _dir) = store_with(kind, Some(2));

        store.store("long", &1, Duration::from_secs(300)).await.unwrap();
        store.store("short", &2, Duration::from_secs(10)).await.unwrap();
        store.store("medium", &3, Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.len().await.unwrap(), 2);
        assert_eq!(store.retrieve::<i32>("short").await, None);
        assert_eq!(store.retrieve::<i32>("long").await, Some(1));
        assert_eq!(store.retrieve::<i32>("medium").await, Some(3));
        assert_eq!(store.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_new_entry_survives_its_own_eviction() {
        let (_clock, store, _dir) = store_with(Kind::Memory, Some(1));

        store.store("old", &1, Duration::from_secs(300)).await.unwrap();
        store.store("new", &2, Duration::from_secs(1)).await.unwrap();

        assert_eq!(store.retrieve::<i32>("new").await, Some(2));
        assert_eq!(store.retrieve::<i32>("old").await, None);
    }

    #[tokio::test]
    async fn test_concurrent_writes_respect_capacity() {
        let (_clock, store, _dir) = store_with(Kind::Memory, Some(5));
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for i in 0..40u64 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .store(&format!("key-{i}"), &i, Duration::from_secs(60 + i))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(store.len().await.unwrap() <= 5);
        assert_eq!(store.retrieve::<u64>("key-39").await, Some(39));
    }

    #[rstest]
    #[case::memory(Kind::Memory)]
    #[case::file(Kind::File)]
    #[tokio::test]
    async fn test_corrupt_entry_self_heals(#[case] kind: Kind) {
        let (_clock, store, _dir) = store_with(kind, None);
        let storage_key = hash_key("k");
        store
            .backend()
            .put(&storage_key, b"garbage".to_vec(), chrono::Utc::now())
            .await
            .unwrap();

        assert_eq!(store.retrieve::<String>("k").await, None);
        assert!(!store.backend().contains(&storage_key).await.unwrap());
        assert_eq!(store.stats().corrupt, 1);

        store.store("k", "fresh", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.retrieve::<String>("k").await.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_clear_single_and_all() {
        let (_clock, store, _dir) = store_with(Kind::Memory, None);
        store.store("a", &1, Duration::from_secs(60)).await.unwrap();
        store.store("b", &2, Duration::from_secs(60)).await.unwrap();
        store.store("c", &3, Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.clear(Some("a")).await.unwrap(), 1);
        assert_eq!(store.clear(Some("a")).await.unwrap(), 0);
        assert_eq!(store.retrieve::<i32>("b").await, Some(2));

        assert_eq!(store.clear(None).await.unwrap(), 2);
        assert_eq!(store.len().await.unwrap(), 0);
    }

    #[rstest]
    #[case::memory(Kind::Memory)]
    #[case::file(Kind::File)]
    #[tokio::test]
    async fn test_purge_expired(#[case] kind: Kind) {
        let (clock, store, _dir) = store_with(kind, None);
        store.store("short", &1, Duration::from_secs(5)).await.unwrap();
        store.store("long", &2, Duration::from_secs(500)).await.unwrap();

        clock.advance(Duration::from_secs(10));
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.len().await.unwrap(), 1);
        assert_eq!(store.retrieve::<i32>("long").await, Some(2));
    }

    #[tokio::test]
    async fn test_compressed_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::builder(FileBackend::new(dir.path()))
            .compression(Compression::gzip())
            .build()
            .unwrap();
        store.store("user_123", &john(), Duration::from_secs(60)).await.unwrap();

        let path = dir.path().join(format!("{}.cache", hash_key("user_123")));
        let raw = std::fs::read(path).unwrap();
        let json = GzipCompressor::default().decompress(&raw).unwrap();
        let record: CacheRecord<User> = serde_json::from_slice(&json).unwrap();
        assert_eq!(record.key, "user_123");
        assert_eq!(record.value, john());
    }

    #[tokio::test]
    async fn test_file_entries_survive_new_store_instance() {
        let dir = tempfile::tempdir().unwrap();
        let first = CacheStore::builder(FileBackend::new(dir.path())).build().unwrap();
        first.store("user_123", &john(), Duration::from_secs(60)).await.unwrap();
        drop(first);

        let second = CacheStore::builder(FileBackend::new(dir.path())).build().unwrap();
        assert_eq!(second.retrieve::<User>("user_123").await, Some(john()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_purges_until_cancelled() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(
            CacheStore::builder(MemoryBackend::new())
                .clock(clock.clone())
                .build()
                .unwrap(),
        );
        store.store("k", &1, Duration::from_secs(1)).await.unwrap();
        clock.advance(Duration::from_secs(2));

        let cancel = CancellationToken::new();
        let handle = store.spawn_sweeper(Duration::from_secs(30), cancel.clone());
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(store.len().await.unwrap(), 0);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = CacheStore::builder(MemoryBackend::new()).capacity(0).build().unwrap_err();
        assert!(matches!(err, CallGuardError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_stats_hit_rate() {
        let store = CacheStore::in_memory();
        store.store("k", &1, Duration::from_secs(60)).await.unwrap();
        store.retrieve::<i32>("k").await;
        store.retrieve::<i32>("missing").await;

        let stats = store.stats();
        assert_eq!((stats.hits, stats.misses, stats.writes), (1, 1, 1));
    }
}
