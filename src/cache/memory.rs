//! Bounded in-process backend: LRU eviction plus per-entry TTL.
//!
//! Expiration is enforced on read; the optional background sweep only
//! reclaims memory earlier and never affects correctness.

use super::{glob_match, CacheBackend, CacheStats, Counters};
use crate::time::{Clock, SystemClock};
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct MemoryCacheConfig {
    /// LRU capacity; inserting past it evicts the least recently used entry.
    pub max_entries: usize,
    /// Cadence of the background expiry sweep; `None` disables the task.
    pub cleanup_interval: Option<Duration>,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            cleanup_interval: Some(Duration::from_secs(60)),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Vec<u8>,
    stored_at_ms: u64,
    ttl: Option<Duration>,
}

impl StoredEntry {
    fn expired(&self, now_ms: u64) -> bool {
        match self.ttl {
            Some(ttl) => now_ms.saturating_sub(self.stored_at_ms) > ttl.as_millis() as u64,
            None => false,
        }
    }
}

struct MemoryInner {
    entries: Mutex<LruCache<String, StoredEntry>>,
    counters: Counters,
    clock: Arc<dyn Clock>,
}

/// In-process [`CacheBackend`]. Construction inside a tokio runtime is
/// required when a cleanup interval is configured.
pub struct MemoryCache {
    inner: Arc<MemoryInner>,
    janitor: Option<JoinHandle<()>>,
}

impl MemoryCache {
    pub fn new(config: MemoryCacheConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }

    pub fn with_clock<C: Clock + 'static>(config: MemoryCacheConfig, clock: C) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        let inner = Arc::new(MemoryInner {
            entries: Mutex::new(LruCache::new(capacity)),
            counters: Counters::default(),
            clock: Arc::new(clock),
        });
        let janitor = config
            .cleanup_interval
            .map(|interval| spawn_janitor(Arc::downgrade(&inner), interval));
        Self { inner, janitor }
    }
}

fn spawn_janitor(inner: Weak<MemoryInner>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick fires immediately
        loop {
            ticker.tick().await;
            match inner.upgrade() {
                Some(inner) => {
                    let removed = inner.cleanup();
                    if removed > 0 {
                        tracing::debug!(removed, "memory cache sweep removed expired entries");
                    }
                }
                None => break,
            }
        }
    })
}

impl Drop for MemoryCache {
    fn drop(&mut self) {
        if let Some(janitor) = self.janitor.take() {
            janitor.abort();
        }
    }
}

impl MemoryInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, StoredEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = self.clock.now_millis();
        let mut entries = self.lock();
        let expired = match entries.get(key) {
            None => {
                self.counters.miss();
                return None;
            }
            Some(entry) => {
                if !entry.expired(now) {
                    let value = entry.value.clone();
                    self.counters.hit();
                    return Some(value);
                }
                true
            }
        };
        if expired {
            entries.pop(key);
            self.counters.evict();
            self.counters.miss();
        }
        None
    }

    fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        let now = self.clock.now_millis();
        let mut entries = self.lock();
        let evicting = entries.len() == entries.cap().get() && !entries.contains(key);
        entries.put(
            key.to_string(),
            StoredEntry {
                value,
                stored_at_ms: now,
                ttl,
            },
        );
        if evicting {
            self.counters.evict();
        }
        self.counters.set();
    }

    fn delete(&self, key: &str) -> bool {
        let removed = self.lock().pop(key).is_some();
        if removed {
            self.counters.delete();
        }
        removed
    }

    fn has(&self, key: &str) -> bool {
        let now = self.clock.now_millis();
        let mut entries = self.lock();
        enum Peeked {
            Missing,
            Expired,
            Live,
        }
        let peeked = match entries.peek(key) {
            None => Peeked::Missing,
            Some(entry) if entry.expired(now) => Peeked::Expired,
            Some(_) => Peeked::Live,
        };
        match peeked {
            Peeked::Live => true,
            Peeked::Expired => {
                entries.pop(key);
                self.counters.evict();
                false
            }
            Peeked::Missing => false,
        }
    }

    fn keys(&self, pattern: Option<&str>) -> Vec<String> {
        let now = self.clock.now_millis();
        self.lock()
            .iter()
            .filter(|(_, entry)| !entry.expired(now))
            .filter(|(key, _)| pattern.map_or(true, |pattern| glob_match(pattern, key)))
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn cleanup(&self) -> usize {
        let now = self.clock.now_millis();
        let mut entries = self.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        self.counters.evict_n(expired.len() as u64);
        expired.len()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.get(key)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        self.inner.set(key, value, ttl);
    }

    async fn delete(&self, key: &str) -> bool {
        self.inner.delete(key)
    }

    async fn has(&self, key: &str) -> bool {
        self.inner.has(key)
    }

    async fn clear(&self) {
        self.inner.lock().clear();
    }

    async fn keys(&self, pattern: Option<&str>) -> Vec<String> {
        self.inner.keys(pattern)
    }

    async fn cleanup(&self) -> usize {
        self.inner.cleanup()
    }

    async fn stats(&self) -> CacheStats {
        let size = self.inner.lock().len();
        self.inner.counters.snapshot(size)
    }

    fn reset_stats(&self) {
        self.inner.counters.reset();
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;

    fn cache_with_clock(max_entries: usize) -> (MemoryCache, ManualClock) {
        let clock = ManualClock::new();
        let cache = MemoryCache::with_clock(
            MemoryCacheConfig {
                max_entries,
                cleanup_interval: None,
            },
            clock.clone(),
        );
        (cache, clock)
    }

    #[tokio::test]
    async fn set_then_get_within_ttl() {
        let (cache, clock) = cache_with_clock(10);
        cache
            .set("k", b"v".to_vec(), Some(Duration::from_millis(100)))
            .await;
        assert_eq!(cache.get("k").await, Some(b"v".to_vec()));

        clock.advance(Duration::from_millis(101));
        assert_eq!(cache.get("k").await, None);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1, "expired entry removed on read");
    }

    #[tokio::test]
    async fn zero_ttl_means_no_expiration() {
        let (cache, clock) = cache_with_clock(10);
        cache.set("forever", b"v".to_vec(), None).await;
        clock.advance(Duration::from_secs(3600 * 24 * 365));
        assert!(cache.has("forever").await);
        assert_eq!(cache.get("forever").await, Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn lru_evicts_the_least_recently_used() {
        let (cache, _clock) = cache_with_clock(2);
        cache.set("a", b"1".to_vec(), None).await;
        cache.set("b", b"2".to_vec(), None).await;
        // Touch "a" so "b" is the eviction candidate.
        assert!(cache.get("a").await.is_some());

        cache.set("c", b"3".to_vec(), None).await;
        assert!(cache.get("a").await.is_some());
        assert!(cache.get("b").await.is_none());
        assert!(cache.get("c").await.is_some());
        assert_eq!(cache.stats().await.evictions, 1);
    }

    #[tokio::test]
    async fn overwriting_is_not_an_eviction() {
        let (cache, _clock) = cache_with_clock(2);
        cache.set("a", b"1".to_vec(), None).await;
        cache.set("b", b"2".to_vec(), None).await;
        cache.set("a", b"updated".to_vec(), None).await;
        assert_eq!(cache.get("a").await, Some(b"updated".to_vec()));
        assert_eq!(cache.stats().await.evictions, 0);
    }

    #[tokio::test]
    async fn delete_reports_whether_something_was_removed() {
        let (cache, _clock) = cache_with_clock(10);
        cache.set("k", b"v".to_vec(), None).await;
        assert!(cache.delete("k").await);
        assert!(!cache.delete("k").await);
        assert_eq!(cache.stats().await.deletes, 1);
    }

    #[tokio::test]
    async fn keys_filters_by_pattern_and_skips_expired() {
        let (cache, clock) = cache_with_clock(10);
        cache
            .set("rate:shippo:h1", b"1".to_vec(), Some(Duration::from_millis(50)))
            .await;
        cache.set("rate:shippo:h2", b"2".to_vec(), None).await;
        cache.set("rate:veeqo:h3", b"3".to_vec(), None).await;
        cache.set("health:shippo", b"4".to_vec(), None).await;

        let mut all = cache.keys(Some("*")).await;
        all.sort();
        assert_eq!(all.len(), 4);

        clock.advance(Duration::from_millis(51));
        let mut shippo = cache.keys(Some("rate:shippo:*")).await;
        shippo.sort();
        assert_eq!(shippo, vec!["rate:shippo:h2".to_string()]);
    }

    #[tokio::test]
    async fn cleanup_sweeps_only_expired_entries() {
        let (cache, clock) = cache_with_clock(10);
        cache
            .set("short", b"1".to_vec(), Some(Duration::from_millis(10)))
            .await;
        cache
            .set("long", b"2".to_vec(), Some(Duration::from_secs(60)))
            .await;
        cache.set("forever", b"3".to_vec(), None).await;

        clock.advance(Duration::from_millis(20));
        assert_eq!(cache.cleanup().await, 1);
        assert_eq!(cache.stats().await.approximate_size, 2);
        assert!(cache.has("long").await);
        assert!(cache.has("forever").await);
    }

    #[tokio::test]
    async fn clear_empties_the_cache() {
        let (cache, _clock) = cache_with_clock(10);
        cache.set("a", b"1".to_vec(), None).await;
        cache.set("b", b"2".to_vec(), None).await;
        cache.clear().await;
        assert!(cache.keys(None).await.is_empty());
        assert_eq!(cache.stats().await.approximate_size, 0);
    }

    #[tokio::test]
    async fn background_sweep_reclaims_expired_entries() {
        tokio::time::pause();
        let clock = ManualClock::new();
        let cache = MemoryCache::with_clock(
            MemoryCacheConfig {
                max_entries: 10,
                cleanup_interval: Some(Duration::from_millis(100)),
            },
            clock.clone(),
        );
        cache
            .set("k", b"v".to_vec(), Some(Duration::from_millis(10)))
            .await;
        clock.advance(Duration::from_millis(20));

        // Let the janitor tick.
        tokio::time::advance(Duration::from_millis(150)).await;
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(cache.stats().await.approximate_size, 0);
    }

    #[tokio::test]
    async fn stats_reset_zeroes_counters_but_not_contents() {
        let (cache, _clock) = cache_with_clock(10);
        cache.set("a", b"1".to_vec(), None).await;
        let _ = cache.get("a").await;
        cache.reset_stats();
        let stats = cache.stats().await;
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.sets, 0);
        assert_eq!(stats.approximate_size, 1);
    }
}
