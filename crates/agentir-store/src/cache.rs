//! Hot cache layer using [`moka`].
//!
//! The durable store reads through a [`CacheLayer`] before touching SQLite.
//! Entries are bounded by capacity and time-to-live; a stale or evicted
//! entry simply becomes a miss.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::future::Cache;
use tracing::debug;

// ── cache stats ──────────────────────────────────────────────────────

/// Counters tracking cache effectiveness.
#[derive(Debug)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.hits() + self.misses()
    }

    /// Hit rate in `[0, 1]`; 0.0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.hits() as f64 / total as f64
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} total={} rate={:.2}%",
            self.hits(),
            self.misses(),
            self.total(),
            self.hit_rate() * 100.0,
        )
    }
}

// ── cache layer ──────────────────────────────────────────────────────

/// A named, async-aware cache of cloned values keyed by string.
pub struct CacheLayer<T> {
    name: &'static str,
    inner: Cache<String, T>,
    stats: Arc<CacheStats>,
}

impl<T> Clone for CacheLayer<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            inner: self.inner.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<T> CacheLayer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn builder(name: &'static str) -> CacheLayerBuilder<T> {
        CacheLayerBuilder {
            name,
            max_capacity: 10_000,
            ttl_seconds: 300,
            _marker: std::marker::PhantomData,
        }
    }

    /// Look up a cached value. Returns `None` on miss.
    pub async fn get(&self, key: &str) -> Option<T> {
        match self.inner.get(key).await {
            Some(value) => {
                self.stats.record_hit();
                debug!(cache = self.name, key, "cache hit");
                Some(value)
            }
            None => {
                self.stats.record_miss();
                debug!(cache = self.name, key, "cache miss");
                None
            }
        }
    }

    pub async fn insert(&self, key: &str, value: T) {
        self.inner.insert(key.to_owned(), value).await;
        debug!(cache = self.name, key, "cache insert");
    }

    pub async fn invalidate_all(&self) {
        self.inner.invalidate_all();
        debug!(cache = self.name, "cache invalidate_all");
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

// ── builder ──────────────────────────────────────────────────────────

/// Builder for [`CacheLayer`].
pub struct CacheLayerBuilder<T> {
    name: &'static str,
    max_capacity: u64,
    ttl_seconds: u64,
    _marker: std::marker::PhantomData<T>,
}

impl<T> CacheLayerBuilder<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn max_capacity(mut self, cap: u64) -> Self {
        self.max_capacity = cap;
        self
    }

    pub fn ttl_seconds(mut self, secs: u64) -> Self {
        self.ttl_seconds = secs;
        self
    }

    pub fn build(self) -> CacheLayer<T> {
        let inner = Cache::builder()
            .max_capacity(self.max_capacity)
            .time_to_live(Duration::from_secs(self.ttl_seconds))
            .build();

        debug!(
            name = self.name,
            max_capacity = self.max_capacity,
            ttl_seconds = self.ttl_seconds,
            "cache layer created"
        );

        CacheLayer {
            name: self.name,
            inner,
            stats: Arc::new(CacheStats::new()),
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make_cache() -> CacheLayer<String> {
        CacheLayer::builder("test")
            .max_capacity(100)
            .ttl_seconds(60)
            .build()
    }

    #[tokio::test]
    async fn insert_then_get() {
        let cache = make_cache();
        cache.insert("k", "v".to_string()).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));
        cache.insert("k", "w".to_string()).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("w"));
    }

    #[tokio::test]
    async fn stats_tracking() {
        let cache = make_cache();
        cache.insert("k", "v".to_string()).await;

        let _ = cache.get("k").await;
        let _ = cache.get("nope1").await;
        let _ = cache.get("nope2").await;

        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 2);
        assert!((cache.stats().hit_rate() - (1.0 / 3.0)).abs() < 0.01);
    }

    #[tokio::test]
    async fn invalidate_all_clears_cache() {
        let cache = make_cache();
        cache.insert("a", "1".to_string()).await;
        cache.insert("b", "2".to_string()).await;
        cache.invalidate_all().await;
        assert!(cache.get("a").await.is_none());
        assert!(cache.get("b").await.is_none());
    }

    #[test]
    fn stats_display() {
        let stats = CacheStats::new();
        assert_eq!(stats.hit_rate(), 0.0);
        stats.hits.store(50, Ordering::Relaxed);
        stats.misses.store(50, Ordering::Relaxed);
        assert!(format!("{stats}").contains("50.00%"));
    }
}
