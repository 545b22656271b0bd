use super::CacheBackend;
use async_trait::async_trait;
use callguard_core::StorageError;
use chrono::{DateTime, Utc};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::AsyncCommands;
use tracing::debug;

/// Redis backend.
///
/// Entries are stored at `{namespace}:{key}` with a `PX` expiry, and a
/// sorted set at `{namespace}:__expiry` indexes keys by expiration time
/// (milliseconds since the epoch) for eviction ordering.
#[derive(Clone)]
pub struct RedisBackend {
    pool: Pool,
    namespace: String,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl RedisBackend {
    /// Wrap an existing pool.
    pub fn new(pool: Pool, namespace: impl Into<String>) -> Self {
        Self {
            pool,
            namespace: namespace.into(),
        }
    }

    /// Create a pool for `url` (e.g. `redis://127.0.0.1:6379`).
    pub fn from_url(url: &str, namespace: impl Into<String>) -> Result<Self, StorageError> {
        let pool = Config::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StorageError::backend(format!("redis pool: {e}")))?;
        Ok(Self::new(pool, namespace))
    }

    /// Key namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn data_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    fn index_key(&self) -> String {
        format!("{}:__expiry", self.namespace)
    }

    async fn conn(&self) -> Result<Connection, StorageError> {
        self.pool
            .get()
            .await
            .map_err(|e| StorageError::backend(format!("redis connection: {e}")))
    }
}

fn redis_err(e: redis::RedisError) -> StorageError {
    StorageError::backend(format!("redis: {e}"))
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut conn = self.conn().await?;
        let now_ms = Utc::now().timestamp_millis();
        let expires_ms = expires_at.timestamp_millis();
        // PX must be positive; already-expired entries live for 1ms.
        let ttl_ms = (expires_ms - now_ms).max(1);

        let _: () = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(self.data_key(key))
            .arg(bytes)
            .arg("PX")
            .arg(ttl_ms)
            .ignore()
            .cmd("ZADD")
            .arg(self.index_key())
            .arg(expires_ms)
            .arg(key)
            .ignore()
            .cmd("ZREMRANGEBYSCORE")
            .arg(self.index_key())
            .arg("-inf")
            .arg(now_ms - 1)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(redis_err)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let mut conn = self.conn().await?;
        let data = conn
            .get::<_, Option<Vec<u8>>>(self.data_key(key))
            .await
            .map_err(redis_err)?;
        if data.is_none() {
            conn.zrem::<_, _, ()>(self.index_key(), key)
                .await
                .map_err(redis_err)?;
        }
        Ok(data)
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let mut conn = self.conn().await?;
        let (deleted, _): (i64, i64) = redis::pipe()
            .atomic()
            .cmd("DEL")
            .arg(self.data_key(key))
            .cmd("ZREM")
            .arg(self.index_key())
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(redis_err)?;
        Ok(deleted > 0)
    }

    async fn contains(&self, key: &str) -> Result<bool, StorageError> {
        let mut conn = self.conn().await?;
        conn.exists::<_, bool>(self.data_key(key))
            .await
            .map_err(redis_err)
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut conn = self.conn().await?;
        conn.zrange::<_, Vec<String>>(self.index_key(), 0, -1)
            .await
            .map_err(redis_err)
    }

    async fn expirations(&self) -> Result<Vec<(String, DateTime<Utc>)>, StorageError> {
        let mut conn = self.conn().await?;
        let scored = conn
            .zrange_withscores::<_, Vec<(String, f64)>>(self.index_key(), 0, -1)
            .await
            .map_err(redis_err)?;
        Ok(scored
            .into_iter()
            .filter_map(|(key, ms)| DateTime::from_timestamp_millis(ms as i64).map(|at| (key, at)))
            .collect())
    }

    async fn clear(&self) -> Result<u64, StorageError> {
        let keys = self.keys().await?;
        let mut conn = self.conn().await?;

        let mut removed = 0u64;
        for chunk in keys.chunks(512) {
            let data_keys: Vec<String> = chunk.iter().map(|k| self.data_key(k)).collect();
            let n = conn.del::<_, u64>(data_keys).await.map_err(redis_err)?;
            removed += n;
        }
        conn.del::<_, ()>(self.index_key())
            .await
            .map_err(redis_err)?;

        debug!(namespace = %self.namespace, removed, "Cleared redis cache namespace");
        Ok(removed)
    }

    async fn len(&self) -> Result<usize, StorageError> {
        let mut conn = self.conn().await?;
        conn.zcard::<_, usize>(self.index_key())
            .await
            .map_err(redis_err)
    }
}
