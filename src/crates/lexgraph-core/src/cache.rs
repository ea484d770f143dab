//! Generic TTL + LRU cache.
//!
//! Process-wide, concurrent-safe caching used by the result cache (agent
//! outputs) and the retrieval cache. Entries expire after a TTL and the
//! least recently used entry is evicted when the cache is full. Eviction
//! takes the write lock briefly; no lock is held across await points.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries before LRU eviction.
    pub max_entries: usize,

    /// Default time-to-live for entries.
    pub default_ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            default_ttl: Some(Duration::from_secs(3_600)),
        }
    }
}

/// Hit/miss/eviction counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

impl CacheMetrics {
    /// Fraction of lookups served from the cache.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    last_accessed: Instant,
    expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            value,
            last_accessed: now,
            expires_at: ttl.map(|d| now + d),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() > at)
    }
}

struct CacheInner<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    metrics: CacheMetrics,
}

/// Concurrent cache with TTL expiry and LRU eviction.
pub struct Cache<K, V> {
    inner: RwLock<CacheInner<K, V>>,
    config: CacheConfig,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: RwLock::new(CacheInner {
                entries: HashMap::new(),
                metrics: CacheMetrics::default(),
            }),
            config,
        }
    }

    /// Look up a value. Expired entries count as misses and are removed.
    pub async fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.write().await;
        match inner.entries.get_mut(key) {
            Some(entry) if !entry.is_expired() => {
                entry.last_accessed = Instant::now();
                let value = entry.value.clone();
                inner.metrics.hits += 1;
                Some(value)
            }
            Some(_) => {
                inner.entries.remove(key);
                inner.metrics.misses += 1;
                inner.metrics.entries = inner.entries.len();
                None
            }
            None => {
                inner.metrics.misses += 1;
                None
            }
        }
    }

    /// Insert with the default TTL.
    pub async fn put(&self, key: K, value: V) {
        self.put_with_ttl(key, value, self.config.default_ttl).await;
    }

    /// Insert with an explicit TTL (`None` = never expires).
    pub async fn put_with_ttl(&self, key: K, value: V, ttl: Option<Duration>) {
        let mut inner = self.inner.write().await;

        if inner.entries.len() >= self.config.max_entries && !inner.entries.contains_key(&key) {
            // Evict the least recently used entry, preferring expired ones.
            let victim = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| (!e.is_expired(), e.last_accessed))
                .map(|(k, _)| k.clone());
            if let Some(victim) = victim {
                inner.entries.remove(&victim);
                inner.metrics.evictions += 1;
            }
        }

        inner.entries.insert(key, CacheEntry::new(value, ttl));
        inner.metrics.entries = inner.entries.len();
    }

    /// Remove a single entry.
    pub async fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.write().await;
        let removed = inner.entries.remove(key).map(|e| e.value);
        inner.metrics.entries = inner.entries.len();
        removed
    }

    /// Remove every entry matching the predicate, returning how many were
    /// removed. Used for per-case invalidation.
    pub async fn invalidate_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&K) -> bool,
    {
        let mut inner = self.inner.write().await;
        let before = inner.entries.len();
        inner.entries.retain(|k, _| !predicate(k));
        let removed = before - inner.entries.len();
        inner.metrics.entries = inner.entries.len();
        removed
    }

    /// Drop all entries. Exposed for test teardown.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.entries.clear();
        inner.metrics.entries = 0;
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot of the counters.
    pub async fn metrics(&self) -> CacheMetrics {
        self.inner.read().await.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_cache(max_entries: usize) -> Cache<String, String> {
        Cache::new(CacheConfig {
            max_entries,
            default_ttl: Some(Duration::from_secs(60)),
        })
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let cache = small_cache(10);
        cache.put("k1".into(), "v1".into()).await;

        assert_eq!(cache.get(&"k1".to_string()).await, Some("v1".to_string()));
        assert_eq!(cache.get(&"k2".to_string()).await, None);

        let metrics = cache.metrics().await;
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 1);
    }

    #[tokio::test]
    async fn test_get_returns_identical_value() {
        let cache: Cache<String, Vec<u8>> = Cache::new(CacheConfig::default());
        let value = vec![0u8, 1, 2, 255, 254];
        cache.put("bytes".into(), value.clone()).await;
        assert_eq!(cache.get(&"bytes".to_string()).await, Some(value));
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = small_cache(10);
        cache
            .put_with_ttl("k".into(), "v".into(), Some(Duration::from_millis(10)))
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get(&"k".to_string()).await, None);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let cache = small_cache(2);
        cache.put("a".into(), "1".into()).await;
        cache.put("b".into(), "2".into()).await;

        // Touch "a" so "b" becomes the LRU victim.
        cache.get(&"a".to_string()).await;
        cache.put("c".into(), "3".into()).await;

        assert!(cache.get(&"a".to_string()).await.is_some());
        assert!(cache.get(&"b".to_string()).await.is_none());
        assert!(cache.get(&"c".to_string()).await.is_some());
        assert_eq!(cache.metrics().await.evictions, 1);
    }

    #[tokio::test]
    async fn test_invalidate_where() {
        let cache = small_cache(10);
        cache.put("case1:timeline".into(), "x".into()).await;
        cache.put("case1:risk".into(), "y".into()).await;
        cache.put("case2:timeline".into(), "z".into()).await;

        let removed = cache.invalidate_where(|k| k.starts_with("case1:")).await;
        assert_eq!(removed, 2);
        assert_eq!(cache.len().await, 1);
    }
}
