//! Response cache: backend contract, key policy, and two implementations.
//!
//! Callers never treat a cache failure as fatal. Both backends degrade the
//! same way — a failed read is a miss, a failed write is a no-op — so the
//! adapter pipeline stays correct with the cache gone entirely.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub mod keys;
mod memory;
mod remote;

pub use memory::{MemoryCache, MemoryCacheConfig};
pub use remote::{RedisCache, RedisCacheConfig};

/// Per-operation TTL policy for the adapter pipeline.
#[derive(Debug, Clone)]
pub struct CacheTtls {
    pub rate_quote: Duration,
    pub health_check: Duration,
    pub purchase: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            rate_quote: Duration::from_secs(300),
            health_check: Duration::from_secs(30),
            purchase: Duration::from_secs(3600),
        }
    }
}

/// Snapshot of a backend's counters. Monotonically non-decreasing except
/// after an explicit [`CacheBackend::reset_stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub approximate_size: usize,
}

/// Uniform key/value contract implemented by every backend.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// `None` on miss, on an expired entry, or on backend failure.
    /// Expired entries are removed on read and counted as evictions.
    async fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Overwrite `key`. `ttl = None` means no expiration. Failures are a
    /// logged no-op.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>);

    /// True iff an entry was removed.
    async fn delete(&self, key: &str) -> bool;

    /// True iff [`CacheBackend::get`] would currently return a value.
    async fn has(&self, key: &str) -> bool;

    /// Remove every entry in this backend's scope.
    async fn clear(&self);

    /// All live keys, filtered by a glob where `*` matches any run of
    /// characters. `None` returns everything.
    async fn keys(&self, pattern: Option<&str>) -> Vec<String>;

    /// Scan-and-remove expired entries; safe from a periodic task.
    /// Returns how many entries were removed.
    async fn cleanup(&self) -> usize;

    async fn stats(&self) -> CacheStats;

    fn reset_stats(&self);

    /// Liveness of the backend: ping for remote, always true in-process.
    async fn health_check(&self) -> bool;

    /// Release backend resources on process shutdown. Default no-op.
    async fn shutdown(&self) {}

    fn name(&self) -> &'static str;
}

/// Prefix `key` with a namespace, `namespace:key`.
pub fn namespaced(namespace: &str, key: &str) -> String {
    format!("{}:{}", namespace, key)
}

/// Glob match where `*` matches any run of characters and everything else
/// is literal.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == text;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    let (first, rest) = parts.split_first().expect("split yields at least one part");
    let (last, middle) = rest.split_last().expect("pattern contains a wildcard");

    let Some(mut remainder) = text.strip_prefix(first) else {
        return false;
    };
    for part in middle {
        if part.is_empty() {
            continue;
        }
        match remainder.find(part) {
            Some(at) => remainder = &remainder[at + part.len()..],
            None => return false,
        }
    }
    remainder.ends_with(last)
}

/// Decode a cached JSON value; decode failures are logged misses.
pub async fn get_json<T: DeserializeOwned>(cache: &dyn CacheBackend, key: &str) -> Option<T> {
    let bytes = cache.get(key).await?;
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(error) => {
            tracing::warn!(key, %error, "cached value failed to decode, treating as miss");
            None
        }
    }
}

/// Encode and store a JSON value; encode failures are logged no-ops.
pub async fn set_json<T: Serialize>(
    cache: &dyn CacheBackend,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) {
    match serde_json::to_vec(value) {
        Ok(bytes) => cache.set(key, bytes, ttl).await,
        Err(error) => {
            tracing::warn!(key, %error, "value failed to encode, skipping cache write");
        }
    }
}

/// Hit/miss/set/delete/eviction counters shared by both backends.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
}

impl Counters {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn evict(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn evict_n(&self, n: u64) {
        self.evictions.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, approximate_size: usize) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            approximate_size,
        }
    }

    pub(crate) fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.sets.store(0, Ordering::Relaxed);
        self.deletes.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_patterns_require_equality() {
        assert!(glob_match("rate:shippo:abc", "rate:shippo:abc"));
        assert!(!glob_match("rate:shippo:abc", "rate:shippo:abd"));
        assert!(!glob_match("rate:shippo", "rate:shippo:abc"));
    }

    #[test]
    fn star_matches_any_run_including_empty() {
        assert!(glob_match("rate:easypost:*", "rate:easypost:abc123"));
        assert!(glob_match("rate:easypost:*", "rate:easypost:"));
        assert!(!glob_match("rate:easypost:*", "rate:shippo:abc123"));
        assert!(glob_match("*", ""));
        assert!(glob_match("*", "anything"));
    }

    #[test]
    fn interior_and_multiple_stars() {
        assert!(glob_match("rate:*:abc", "rate:veeqo:abc"));
        assert!(!glob_match("rate:*:abc", "rate:veeqo:abd"));
        assert!(glob_match("*:veeqo:*", "rate:veeqo:xyz"));
        assert!(glob_match("a*b*c", "a-1-b-2-c"));
        assert!(!glob_match("a*b*c", "a-1-c-2-b"));
    }

    #[test]
    fn namespacing_prefixes_with_a_colon() {
        assert_eq!(namespaced("quotes", "rate:shippo:x"), "quotes:rate:shippo:x");
    }

    #[test]
    fn counters_snapshot_and_reset() {
        let counters = Counters::default();
        counters.hit();
        counters.hit();
        counters.miss();
        counters.set();
        counters.evict_n(3);
        let stats = counters.snapshot(42);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.evictions, 3);
        assert_eq!(stats.approximate_size, 42);

        counters.reset();
        assert_eq!(counters.snapshot(0), CacheStats::default());
    }
}
