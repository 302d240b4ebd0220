mod memory_store;
mod redis_store;

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use memory_store::MemoryCacheStore;
use redis_store::RedisCacheStore;

pub const CONFIG_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Clone, Debug)]
enum CacheBackend {
    Memory(MemoryCacheStore),
    Redis(RedisCacheStore),
}

/// Shared key-value store: cached guild settings and the advisory action locks.
#[derive(Clone, Debug)]
pub struct CacheService {
    key_prefix: String,
    backend: CacheBackend,
}

impl CacheService {
    /// Process-local backend. Locks taken through it are only visible to this process.
    pub fn in_memory(prefix: impl Into<String>) -> Self {
        Self {
            key_prefix: prefix.into(),
            backend: CacheBackend::Memory(MemoryCacheStore::default()),
        }
    }

    pub fn redis(redis_url: &str, prefix: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            key_prefix: prefix.into(),
            backend: CacheBackend::Redis(RedisCacheStore::from_url(redis_url)?),
        })
    }

    pub fn is_redis_enabled(&self) -> bool {
        matches!(self.backend, CacheBackend::Redis(_))
    }

    pub async fn ping(&self) -> anyhow::Result<()> {
        match &self.backend {
            CacheBackend::Memory(_) => Ok(()),
            CacheBackend::Redis(store) => store.ping().await,
        }
    }

    pub fn key(&self, suffix: impl AsRef<str>) -> String {
        format!("{}:{}", self.key_prefix, suffix.as_ref())
    }

    pub async fn get_string(&self, key: &str) -> anyhow::Result<Option<String>> {
        let value = self.get_raw(key).await?;

        value
            .map(|bytes| {
                String::from_utf8(bytes)
                    .map_err(|e| anyhow::anyhow!("cache value for `{key}` is not utf-8: {e}"))
            })
            .transpose()
    }

    /// Unconditional `SET key value PX ttl`.
    pub async fn set_string(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        self.set_raw(key, value.as_bytes().to_vec(), ttl, false)
            .await
            .map(|_| ())
    }

    /// `SET key value PX ttl NX`. Returns `false` when the key already held a live value.
    pub async fn set_string_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> anyhow::Result<bool> {
        self.set_raw(key, value.as_bytes().to_vec(), ttl, true).await
    }

    pub async fn get_json<T>(&self, key: &str) -> anyhow::Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        match self.get_raw(key).await? {
            Some(bytes) => {
                let parsed = serde_json::from_slice(&bytes).map_err(|e| {
                    anyhow::anyhow!("failed to deserialize cache value for `{key}`: {e}")
                })?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }

    pub async fn set_json<T>(&self, key: &str, value: &T, ttl: Duration) -> anyhow::Result<()>
    where
        T: Serialize,
    {
        let payload = serde_json::to_vec(value)
            .map_err(|e| anyhow::anyhow!("failed to serialize cache value for `{key}`: {e}"))?;

        self.set_raw(key, payload, ttl, false).await.map(|_| ())
    }

    pub async fn del(&self, key: &str) -> anyhow::Result<()> {
        match &self.backend {
            CacheBackend::Memory(store) => store.del(key).await,
            CacheBackend::Redis(store) => store.del(key).await,
        }
    }

    pub async fn get_or_load_json<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        loader: F,
    ) -> anyhow::Result<T>
    where
        T: Serialize + DeserializeOwned + Clone,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        match self.get_json::<T>(key).await {
            Ok(Some(cached)) => return Ok(cached),
            Ok(None) => {}
            Err(e) => warn!(
                ?e,
                cache_key = key,
                "cache get failed; falling back to database"
            ),
        }

        let loaded = loader().await?;

        if let Err(e) = self.set_json(key, &loaded, ttl).await {
            warn!(
                ?e,
                cache_key = key,
                "cache set failed; returning database value"
            );
        }

        Ok(loaded)
    }

    async fn get_raw(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        match &self.backend {
            CacheBackend::Memory(store) => store.get(key).await,
            CacheBackend::Redis(store) => store.get(key).await,
        }
    }

    async fn set_raw(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
        only_if_absent: bool,
    ) -> anyhow::Result<bool> {
        match &self.backend {
            CacheBackend::Memory(store) => store.set(key, value, ttl, only_if_absent).await,
            CacheBackend::Redis(store) => store.set(key, value, ttl, only_if_absent).await,
        }
    }
}

pub fn guild_settings_key(cache: &CacheService, guild_id: u64) -> String {
    cache.key(format!("guild_settings:{guild_id}"))
}

pub async fn invalidate_guild_settings(cache: &CacheService, guild_id: u64) -> anyhow::Result<()> {
    cache.del(&guild_settings_key(cache, guild_id)).await
}

/// Advisory lock key for one member of one guild.
pub fn action_lock_key(cache: &CacheService, target_id: u64, guild_id: u64) -> String {
    cache.key(format!("lock:{target_id}:{guild_id}"))
}
