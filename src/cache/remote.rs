//! Redis-backed [`CacheBackend`] for multi-instance deployments.
//!
//! Keys are prefixed with a configured namespace and TTLs use Redis's
//! native expiration. Connection loss never fails a caller: reads become
//! misses, writes become no-ops, and the connection is re-established
//! lazily on a later operation.

use super::{CacheBackend, CacheStats, Counters};
use crate::error::{ErrorKind, GatewayError};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tokio::sync::Mutex;

/// Upper bound on a lazy (re)connection attempt; past it the operation
/// degrades instead of stalling the request.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct RedisCacheConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
    /// Prepended to every key; scopes `clear` and `keys`.
    pub key_prefix: String,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            db: 0,
            key_prefix: "multiship:".to_string(),
        }
    }
}

impl RedisCacheConfig {
    fn url(&self) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

/// Remote [`CacheBackend`]. Construction validates the URL only; the
/// first connection attempt happens on first use so an unreachable host
/// degrades instead of failing startup.
pub struct RedisCache {
    client: redis::Client,
    conn: Mutex<Option<ConnectionManager>>,
    prefix: String,
    counters: Counters,
}

impl RedisCache {
    pub fn new(config: RedisCacheConfig) -> Result<Self, GatewayError> {
        let client = redis::Client::open(config.url()).map_err(|error| {
            GatewayError::new(ErrorKind::Configuration, "cache_connect").with_source(error)
        })?;
        Ok(Self {
            client,
            conn: Mutex::new(None),
            prefix: config.key_prefix,
            counters: Counters::default(),
        })
    }

    /// Drop the live connection; a later operation reconnects lazily.
    pub async fn disconnect(&self) {
        *self.conn.lock().await = None;
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn strip(&self, key: &str) -> Option<String> {
        key.strip_prefix(&self.prefix).map(str::to_string)
    }

    async fn connection(&self) -> Option<ConnectionManager> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Some(conn.clone());
        }
        let attempt = tokio::time::timeout(
            CONNECT_TIMEOUT,
            ConnectionManager::new(self.client.clone()),
        );
        match attempt.await {
            Ok(Ok(conn)) => {
                *guard = Some(conn.clone());
                Some(conn)
            }
            Ok(Err(error)) => {
                tracing::warn!(%error, "redis unreachable, cache degraded");
                None
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = CONNECT_TIMEOUT.as_millis() as u64,
                    "redis connection attempt timed out, cache degraded"
                );
                None
            }
        }
    }

    async fn keys_raw(&self, pattern: &str) -> Vec<String> {
        let Some(mut conn) = self.connection().await else {
            return Vec::new();
        };
        match conn
            .keys::<_, Vec<String>>(format!("{}{}", self.prefix, pattern))
            .await
        {
            Ok(keys) => keys,
            Err(error) => {
                tracing::warn!(%error, "redis KEYS failed");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let Some(mut conn) = self.connection().await else {
            self.counters.miss();
            return None;
        };
        match conn.get::<_, Option<Vec<u8>>>(self.prefixed(key)).await {
            Ok(Some(value)) => {
                self.counters.hit();
                Some(value)
            }
            Ok(None) => {
                self.counters.miss();
                None
            }
            Err(error) => {
                tracing::warn!(key, %error, "redis GET failed, treating as miss");
                self.counters.miss();
                None
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        let Some(mut conn) = self.connection().await else {
            return;
        };
        let prefixed = self.prefixed(key);
        let outcome = match ttl {
            Some(ttl) => {
                conn.pset_ex::<_, _, ()>(prefixed, value, ttl.as_millis() as u64)
                    .await
            }
            None => conn.set::<_, _, ()>(prefixed, value).await,
        };
        match outcome {
            Ok(()) => self.counters.set(),
            Err(error) => tracing::warn!(key, %error, "redis SET failed, skipping cache write"),
        }
    }

    async fn delete(&self, key: &str) -> bool {
        let Some(mut conn) = self.connection().await else {
            return false;
        };
        match conn.del::<_, i64>(self.prefixed(key)).await {
            Ok(removed) if removed > 0 => {
                self.counters.delete();
                true
            }
            Ok(_) => false,
            Err(error) => {
                tracing::warn!(key, %error, "redis DEL failed");
                false
            }
        }
    }

    async fn has(&self, key: &str) -> bool {
        let Some(mut conn) = self.connection().await else {
            return false;
        };
        match conn.exists::<_, bool>(self.prefixed(key)).await {
            Ok(exists) => exists,
            Err(error) => {
                tracing::warn!(key, %error, "redis EXISTS failed");
                false
            }
        }
    }

    async fn clear(&self) {
        let keys = self.keys_raw("*").await;
        if keys.is_empty() {
            return;
        }
        let Some(mut conn) = self.connection().await else {
            return;
        };
        if let Err(error) = conn.del::<_, i64>(keys).await {
            tracing::warn!(%error, "redis scoped clear failed");
        }
    }

    async fn keys(&self, pattern: Option<&str>) -> Vec<String> {
        self.keys_raw(pattern.unwrap_or("*"))
            .await
            .iter()
            .filter_map(|key| self.strip(key))
            .collect()
    }

    async fn cleanup(&self) -> usize {
        // Redis expires entries natively; nothing to sweep.
        0
    }

    async fn stats(&self) -> CacheStats {
        let size = self.keys_raw("*").await.len();
        self.counters.snapshot(size)
    }

    fn reset_stats(&self) {
        self.counters.reset();
    }

    async fn health_check(&self) -> bool {
        let Some(mut conn) = self.connection().await else {
            return false;
        };
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(reply) => reply.eq_ignore_ascii_case("pong"),
            Err(error) => {
                tracing::warn!(%error, "redis PING failed");
                false
            }
        }
    }

    async fn shutdown(&self) {
        self.disconnect().await;
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
