//! Shared TTL cache for health and metrics snapshots
//!
//! Services keep a fast in-process map and mirror writes into this shared
//! cache so snapshots survive restarts and are visible across instances.
//! Redis is the production backend; [`MemoryCache`] backs tests and
//! cache-less deployments. Both are used through the [`OptionalCache`]
//! wrapper, which degrades gracefully when no backend is reachable.

use anyhow::{Context, Result};
use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

// ============================================================================
// Configuration
// ============================================================================

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Redis URL (e.g. redis://localhost:6379)
    pub url: String,

    /// Connection pool size
    pub pool_size: usize,

    /// Key prefix for namespacing
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            key_prefix: "armada".to_string(),
        }
    }
}

impl CacheConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            pool_size: std::env::var("REDIS_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            key_prefix: std::env::var("CACHE_KEY_PREFIX")
                .unwrap_or_else(|_| "armada".to_string()),
        }
    }
}

// ============================================================================
// Trait
// ============================================================================

/// Byte-level shared cache with TTL semantics
#[async_trait]
pub trait SharedCache: Send + Sync {
    /// Fetch a raw value, `None` on miss or expiry
    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a raw value with a time-to-live
    async fn set_raw(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// Remove a value
    async fn delete(&self, key: &str) -> Result<()>;
}

// ============================================================================
// Redis backend
// ============================================================================

/// Redis-backed shared cache
pub struct RedisCache {
    pool: Pool,
    key_prefix: String,
}

impl RedisCache {
    /// Connect to Redis and verify the connection with a PING
    pub async fn new(config: &CacheConfig) -> Result<Self> {
        let pool_config = PoolConfig::from_url(&config.url);
        let pool = pool_config
            .builder()
            .map_err(|e| anyhow::anyhow!("Failed to create pool builder: {e}"))?
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .context("Failed to create Redis connection pool")?;

        let mut conn = pool.get().await.context("Failed to get Redis connection")?;
        let _: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .context("Failed to ping Redis")?;

        tracing::info!(url = %config.url, "Connected to Redis");

        Ok(Self {
            pool,
            key_prefix: config.key_prefix.clone(),
        })
    }

    /// Connect, returning `None` when Redis is unavailable
    pub async fn try_new(config: &CacheConfig) -> Option<Self> {
        match Self::new(config).await {
            Ok(cache) => Some(cache),
            Err(e) => {
                tracing::warn!(error = %e, "Redis cache unavailable, continuing without it");
                None
            }
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }
}

#[async_trait]
impl SharedCache for RedisCache {
    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.pool.get().await.context("Failed to get connection")?;
        let value: Option<Vec<u8>> = conn
            .get(self.full_key(key))
            .await
            .context("Failed to get from cache")?;
        Ok(value)
    }

    async fn set_raw(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let mut conn = self.pool.get().await.context("Failed to get connection")?;
        conn.set_ex::<_, _, ()>(self.full_key(key), value, ttl.as_secs().max(1))
            .await
            .context("Failed to set cache")?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.pool.get().await.context("Failed to get connection")?;
        let _: () = conn
            .del(self.full_key(key))
            .await
            .context("Failed to delete key")?;
        Ok(())
    }
}

// ============================================================================
// In-memory backend
// ============================================================================

/// In-process shared cache with lazy TTL eviction
pub struct MemoryCache {
    entries: RwLock<HashMap<String, (Vec<u8>, Instant)>>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    /// Create an empty memory cache
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SharedCache for MemoryCache {
    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some((value, deadline)) if *deadline > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_raw(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

// ============================================================================
// Optional wrapper with typed access
// ============================================================================

/// Shared cache wrapper that tolerates a missing or failing backend
///
/// Cache reads and writes here are best-effort: a failure is logged and
/// treated as a miss so the calling service falls back to recomputation.
#[derive(Clone)]
pub struct OptionalCache {
    inner: Option<Arc<dyn SharedCache>>,
}

impl OptionalCache {
    /// Wrap a backend
    pub fn new(cache: Arc<dyn SharedCache>) -> Self {
        Self { inner: Some(cache) }
    }

    /// An always-missing cache
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Connect to Redis from config, degrading to disabled when unreachable
    pub async fn from_config(config: &CacheConfig) -> Self {
        match RedisCache::try_new(config).await {
            Some(cache) => Self::new(Arc::new(cache)),
            None => Self::disabled(),
        }
    }

    /// Whether a backend is attached
    pub fn is_available(&self) -> bool {
        self.inner.is_some()
    }

    /// Typed get, treating backend errors and decode failures as misses
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let cache = self.inner.as_ref()?;
        match cache.get_raw(key).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Failed to decode cached value");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Shared cache read failed");
                None
            }
        }
    }

    /// Typed set, logging and swallowing backend failures
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let Some(cache) = self.inner.as_ref() else {
            return;
        };
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to encode value for cache");
                return;
            }
        };
        if let Err(e) = cache.set_raw(key, bytes, ttl).await {
            tracing::warn!(key = %key, error = %e, "Shared cache write failed");
        }
    }

    /// Delete a key, logging failures
    pub async fn remove(&self, key: &str) {
        if let Some(cache) = self.inner.as_ref() {
            if let Err(e) = cache.delete(key).await {
                tracing::warn!(key = %key, error = %e, "Shared cache delete failed");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_cache_roundtrip() {
        let cache = MemoryCache::new();
        cache
            .set_raw("k", b"value".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();

        let got = cache.get_raw("k").await.unwrap();
        assert_eq!(got.as_deref(), Some(b"value".as_ref()));

        cache.delete("k").await.unwrap();
        assert!(cache.get_raw("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_cache_ttl_expiry() {
        let cache = MemoryCache::new();
        cache
            .set_raw("k", b"value".to_vec(), Duration::from_millis(20))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.get_raw("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_optional_cache_typed_roundtrip() {
        let cache = OptionalCache::new(Arc::new(MemoryCache::new()));

        cache.set("n", &42u64, Duration::from_secs(60)).await;
        assert_eq!(cache.get::<u64>("n").await, Some(42));

        cache.remove("n").await;
        assert_eq!(cache.get::<u64>("n").await, None);
    }

    #[tokio::test]
    async fn test_disabled_cache_is_always_miss() {
        let cache = OptionalCache::disabled();
        assert!(!cache.is_available());

        cache.set("n", &1u64, Duration::from_secs(1)).await;
        assert_eq!(cache.get::<u64>("n").await, None);
    }

    #[test]
    fn test_cache_config_default() {
        let config = CacheConfig::default();
        assert_eq!(config.pool_size, 10);
        assert_eq!(config.key_prefix, "armada");
    }

    // Integration test requires running Redis
    #[tokio::test]
    #[ignore = "Requires running Redis"]
    async fn test_redis_cache_connection() {
        let config = CacheConfig::default();
        let cache = RedisCache::new(&config).await;
        assert!(cache.is_ok());
    }
}
