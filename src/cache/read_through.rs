use crate::config::CacheSettings;
use crate::error::Result;
use crate::observability::{get_metrics, LatencyTimer};
use crate::reliability::with_timeout;
use crate::store::SharedStore;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Outcomes counted by [`CacheStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
    Hit,
    Miss,
    Invalidation,
    /// Store or codec failure; the read fell through to the origin.
    Error,
}

/// In-process cache counters.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
    errors: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: CacheEvent) {
        let counter = match event {
            CacheEvent::Hit => &self.hits,
            CacheEvent::Miss => &self.misses,
            CacheEvent::Invalidation => &self.invalidations,
            CacheEvent::Error => &self.errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
    pub errors: u64,
}

impl CacheStatsSnapshot {
    /// Share of lookups answered from the store; None before the first lookup.
    pub fn hit_rate(&self) -> Option<f64> {
        let lookups = self.hits + self.misses;
        (lookups > 0).then(|| self.hits as f64 / lookups as f64)
    }
}

/// Where a [`Cached`] value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSource {
    Cache,
    Origin,
}

/// Stored form of a cached value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub key: String,
    pub value: T,
    pub cached_at: DateTime<Utc>,
    pub ttl_secs: u64,
    /// Backend that stored the entry.
    pub source: String,
}

/// Value returned by [`ReadThroughCache::wrap`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cached<T> {
    pub data: T,
    pub cached: bool,
    pub source: CacheSource,
}

/// Read-through cache over the shared store.
///
/// Store failures never fail a read: a failed or undecodable GET is a miss
/// and a failed SET is only logged. Concurrent misses on one key each run
/// `compute`; there is no single-flight coalescing. Writers must call
/// [`invalidate`](Self::invalidate) for every key their write affects.
pub struct ReadThroughCache {
    store: Arc<dyn SharedStore>,
    settings: CacheSettings,
    store_timeout: Duration,
    stats: Arc<CacheStats>,
}

impl ReadThroughCache {
    pub fn new(store: Arc<dyn SharedStore>, settings: CacheSettings, store_timeout: Duration) -> Self {
        Self {
            store,
            settings,
            store_timeout,
            stats: Arc::new(CacheStats::new()),
        }
    }

    /// Returns cache statistics.
    pub fn stats(&self) -> Arc<CacheStats> {
        self.stats.clone()
    }

    pub fn default_ttl(&self) -> Duration {
        self.settings.default_ttl()
    }

    fn cache_key(&self, key: &str) -> String {
        format!("{}:{}", self.settings.key_prefix, key)
    }

    /// Returns the cached value for `key`, or runs `compute` and caches its
    /// result for `ttl`. Errors from `compute` propagate and are not cached.
    pub async fn wrap<T, F, Fut>(&self, key: &str, compute: F, ttl: Duration) -> Result<Cached<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.settings.enabled {
            if let Some(value) = self.get::<T>(key).await {
                return Ok(Cached {
                    data: value,
                    cached: true,
                    source: CacheSource::Cache,
                });
            }
        }

        let value = compute().await?;

        if self.settings.enabled {
            self.set(key, &value, ttl).await;
        }

        Ok(Cached {
            data: value,
            cached: false,
            source: CacheSource::Origin,
        })
    }

    async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let timer = LatencyTimer::new();
        let store = Arc::clone(&self.store);
        let cache_key = self.cache_key(key);

        let raw = match with_timeout(async move { store.get(&cache_key).await }, self.store_timeout, "cache.get").await {
            Ok(raw) => raw,
            Err(e) => {
                self.stats.record(CacheEvent::Error);
                get_metrics().record_cache_error("get");
                tracing::warn!(key = %key, error = %e, "Cache get failed, treating as miss");
                return None;
            }
        };

        let Some(json) = raw else {
            self.stats.record(CacheEvent::Miss);
            get_metrics().record_cache_lookup(false, timer.elapsed_ms());
            return None;
        };

        match serde_json::from_str::<CacheEntry<T>>(&json) {
            Ok(entry) => {
                self.stats.record(CacheEvent::Hit);
                get_metrics().record_cache_lookup(true, timer.elapsed_ms());
                tracing::debug!(key = %key, cached_at = %entry.cached_at, "Cache hit");
                Some(entry.value)
            }
            Err(e) => {
                self.stats.record(CacheEvent::Error);
                get_metrics().record_cache_error("decode");
                tracing::warn!(key = %key, error = %e, "Failed to decode cache entry, dropping it");
                if let Err(e) = self.invalidate(key).await {
                    tracing::warn!(key = %key, error = %e, "Failed to drop undecodable cache entry");
                }
                None
            }
        }
    }

    async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let entry = CacheEntry {
            key: key.to_string(),
            value,
            cached_at: Utc::now(),
            ttl_secs: ttl.as_secs(),
            source: self.store.backend().to_string(),
        };

        let json = match serde_json::to_string(&entry) {
            Ok(json) => json,
            Err(e) => {
                self.stats.record(CacheEvent::Error);
                tracing::warn!(key = %key, error = %e, "Failed to encode cache entry");
                return;
            }
        };

        let store = Arc::clone(&self.store);
        let cache_key = self.cache_key(key);
        match with_timeout(async move { store.set(&cache_key, &json, ttl).await }, self.store_timeout, "cache.set").await {
            Ok(()) => {
                tracing::debug!(key = %key, ttl_secs = ttl.as_secs(), "Cached value");
            }
            Err(e) => {
                self.stats.record(CacheEvent::Error);
                get_metrics().record_cache_error("set");
                tracing::warn!(key = %key, error = %e, "Cache set failed");
            }
        }
    }

    /// Drops the entry for `key`. Returns whether an entry existed.
    pub async fn invalidate(&self, key: &str) -> Result<bool> {
        let store = Arc::clone(&self.store);
        let cache_key = self.cache_key(key);

        let removed = with_timeout(async move { store.delete(&cache_key).await }, self.store_timeout, "cache.invalidate")
            .await
            .map_err(|e| {
                self.stats.record(CacheEvent::Error);
                get_metrics().record_cache_error("invalidate");
                e
            })?;

        self.stats.record(CacheEvent::Invalidation);
        get_metrics().record_cache_invalidation();
        tracing::debug!(key = %key, removed, "Invalidated cache entry");
        Ok(removed)
    }
}

impl std::fmt::Debug for ReadThroughCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadThroughCache")
            .field("backend", &self.store.backend())
            .field("settings", &self.settings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::store::MemoryStore;

    fn cache() -> ReadThroughCache {
        ReadThroughCache::new(
            Arc::new(MemoryStore::new()),
            CacheSettings::default(),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn test_cache_stats() {
        let stats = CacheStats::new();
        assert_eq!(stats.snapshot().hit_rate(), None);

        stats.record(CacheEvent::Hit);
        stats.record(CacheEvent::Hit);
        stats.record(CacheEvent::Miss);
        stats.record(CacheEvent::Error);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.hits, 2);
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.errors, 1);
        assert!((snapshot.hit_rate().unwrap() - 0.666).abs() < 0.01);
    }

    #[test]
    fn test_cache_key_format() {
        let settings = CacheSettings {
            enabled: true,
            default_ttl_secs: 60,
            key_prefix: "test".to_string(),
        };
        let cache = ReadThroughCache::new(Arc::new(MemoryStore::new()), settings, Duration::from_secs(1));

        assert_eq!(cache.cache_key("orders:alice@example.com"), "test:orders:alice@example.com");
    }

    #[tokio::test]
    async fn test_compute_error_is_not_cached() {
        let cache = cache();

        let first: Result<Cached<u32>> = cache
            .wrap("k", || async { Err(AppError::NotFound("nothing".to_string())) }, Duration::from_secs(60))
            .await;
        assert!(matches!(first, Err(AppError::NotFound(_))));

        let second = cache.wrap("k", || async { Ok(7u32) }, Duration::from_secs(60)).await.unwrap();
        assert_eq!(second.data, 7);
        assert!(!second.cached);
    }

    #[tokio::test]
    async fn test_disabled_cache_always_computes() {
        let settings = CacheSettings {
            enabled: false,
            ..CacheSettings::default()
        };
        let cache = ReadThroughCache::new(Arc::new(MemoryStore::new()), settings, Duration::from_secs(1));

        for _ in 0..2 {
            let result = cache.wrap("k", || async { Ok(1u8) }, Duration::from_secs(60)).await.unwrap();
            assert_eq!(result.source, CacheSource::Origin);
        }
        assert_eq!(cache.stats().snapshot().hits, 0);
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss() {
        let store = Arc::new(MemoryStore::new());
        let cache = ReadThroughCache::new(store.clone(), CacheSettings::default(), Duration::from_secs(1));
        store.set("cache:k", "not json", Duration::from_secs(60)).await.unwrap();

        let result = cache.wrap("k", || async { Ok(3i32) }, Duration::from_secs(60)).await.unwrap();

        assert!(!result.cached);
        assert_eq!(result.data, 3);
        assert_eq!(cache.stats().snapshot().errors, 1);
    }
}
