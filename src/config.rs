//! Process-start configuration.
//!
//! Every knob is read once from the environment; there is no runtime
//! reconfiguration. Unset variables fall back to defaults, malformed
//! values are configuration errors rather than silent fallbacks.

use crate::adapters::AdapterSettings;
use crate::cache::{CacheTtls, MemoryCacheConfig, RedisCacheConfig};
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::{ErrorKind, GatewayError};
use crate::retry::RetryConfig;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Which backend serves the response cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheProviderKind {
    #[default]
    Memory,
    Remote,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub provider: CacheProviderKind,
    /// Global kill-switch; `false` runs every adapter uncached.
    pub enabled: bool,
    pub memory: MemoryCacheConfig,
    pub remote: RedisCacheConfig,
    pub ttls: CacheTtls,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            provider: CacheProviderKind::Memory,
            enabled: true,
            memory: MemoryCacheConfig::default(),
            remote: RedisCacheConfig::default(),
            ttls: CacheTtls::default(),
        }
    }
}

/// Everything the gateway reads at startup.
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    pub easypost: AdapterSettings,
    pub shippo: AdapterSettings,
    pub veeqo: AdapterSettings,
    pub retry: RetryConfig,
    pub breaker: CircuitBreakerConfig,
    pub cache: CacheSettings,
}

impl GatewayConfig {
    /// Read the full configuration surface from the environment.
    pub fn from_env() -> Result<Self, GatewayError> {
        let mut config = GatewayConfig::default();

        config.easypost = provider_settings("EASYPOST");
        config.shippo = provider_settings("SHIPPO");
        config.veeqo = provider_settings("VEEQO");

        if let Some(timeout) = millis("PROVIDER_REQUEST_TIMEOUT_MS")? {
            config.retry.per_attempt_timeout = timeout;
        }
        if let Some(attempts) = parsed::<u32>("PROVIDER_MAX_RETRIES")? {
            config.retry.max_attempts = attempts;
        }
        if let Some(base) = millis("PROVIDER_BASE_DELAY_MS")? {
            config.retry.base_delay = base;
        }
        if let Some(max) = millis("PROVIDER_MAX_DELAY_MS")? {
            config.retry.max_delay = max;
        }
        if let Some(factor) = parsed::<f64>("PROVIDER_BACKOFF_FACTOR")? {
            config.retry.backoff_factor = factor;
        }
        if let Some(threshold) = parsed::<usize>("PROVIDER_FAILURE_THRESHOLD")? {
            config.breaker.failure_threshold = threshold;
        }
        if let Some(recovery) = millis("PROVIDER_RECOVERY_TIMEOUT_MS")? {
            config.breaker.recovery_timeout = recovery;
        }

        if let Some(provider) = parsed::<CacheProviderKind>("CACHE_PROVIDER")? {
            config.cache.provider = provider;
        }
        if let Some(enabled) = parsed::<bool>("CACHE_ENABLED")? {
            config.cache.enabled = enabled;
        }
        if let Some(max_size) = parsed::<usize>("CACHE_MEMORY_MAX_SIZE")? {
            config.cache.memory.max_entries = max_size;
        }
        if let Some(ttl) = millis("CACHE_TTL_RATE_QUOTE_MS")? {
            config.cache.ttls.rate_quote = ttl;
        }
        if let Some(ttl) = millis("CACHE_TTL_HEALTH_CHECK_MS")? {
            config.cache.ttls.health_check = ttl;
        }
        if let Some(ttl) = millis("CACHE_TTL_PURCHASE_MS")? {
            config.cache.ttls.purchase = ttl;
        }

        if let Some(host) = raw("REMOTE_CACHE_HOST") {
            config.cache.remote.host = host;
        }
        if let Some(port) = parsed::<u16>("REMOTE_CACHE_PORT")? {
            config.cache.remote.port = port;
        }
        if let Some(password) = raw("REMOTE_CACHE_PASSWORD") {
            config.cache.remote.password = Some(password);
        }
        if let Some(db) = parsed::<i64>("REMOTE_CACHE_DB")? {
            config.cache.remote.db = db;
        }
        if let Some(prefix) = raw("REMOTE_CACHE_KEY_PREFIX") {
            config.cache.remote.key_prefix = prefix;
        }

        Ok(config)
    }

    pub fn settings_for(&self, provider: crate::model::Provider) -> &AdapterSettings {
        match provider {
            crate::model::Provider::EasyPost => &self.easypost,
            crate::model::Provider::Shippo => &self.shippo,
            crate::model::Provider::Veeqo => &self.veeqo,
        }
    }
}

impl FromStr for CacheProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(CacheProviderKind::Memory),
            "remote" => Ok(CacheProviderKind::Remote),
            other => Err(format!("expected \"memory\" or \"remote\", got {:?}", other)),
        }
    }
}

#[derive(Debug, Error)]
#[error("invalid value for {key}: {value:?}")]
struct InvalidEnvValue {
    key: &'static str,
    value: String,
}

fn provider_settings(name: &str) -> AdapterSettings {
    AdapterSettings {
        api_key: std::env::var(format!("PROVIDER_{}_API_KEY", name))
            .ok()
            .filter(|key| !key.is_empty()),
        base_url: std::env::var(format!("PROVIDER_{}_BASE_URL", name))
            .ok()
            .filter(|url| !url.is_empty()),
        disabled: false,
    }
}

fn raw(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

fn parsed<T: FromStr>(key: &'static str) -> Result<Option<T>, GatewayError> {
    let Some(value) = raw(key) else {
        return Ok(None);
    };
    value.parse::<T>().map(Some).map_err(|_| {
        GatewayError::new(ErrorKind::Configuration, "load_config").with_source(InvalidEnvValue {
            key,
            value,
        })
    })
}

fn millis(key: &'static str) -> Result<Option<Duration>, GatewayError> {
    Ok(parsed::<u64>(key)?.map(Duration::from_millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Provider;
    use std::sync::{Mutex, OnceLock};

    // Environment mutation is process-global; serialize these tests.
    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_env() {
        for key in [
            "PROVIDER_EASYPOST_API_KEY",
            "PROVIDER_EASYPOST_BASE_URL",
            "PROVIDER_SHIPPO_API_KEY",
            "PROVIDER_VEEQO_API_KEY",
            "PROVIDER_REQUEST_TIMEOUT_MS",
            "PROVIDER_MAX_RETRIES",
            "PROVIDER_BASE_DELAY_MS",
            "PROVIDER_MAX_DELAY_MS",
            "PROVIDER_BACKOFF_FACTOR",
            "PROVIDER_FAILURE_THRESHOLD",
            "PROVIDER_RECOVERY_TIMEOUT_MS",
            "CACHE_PROVIDER",
            "CACHE_ENABLED",
            "CACHE_MEMORY_MAX_SIZE",
            "CACHE_TTL_RATE_QUOTE_MS",
            "CACHE_TTL_HEALTH_CHECK_MS",
            "CACHE_TTL_PURCHASE_MS",
            "REMOTE_CACHE_HOST",
            "REMOTE_CACHE_PORT",
            "REMOTE_CACHE_PASSWORD",
            "REMOTE_CACHE_DB",
            "REMOTE_CACHE_KEY_PREFIX",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn defaults_match_the_documented_table() {
        let _guard = env_lock().lock().unwrap();
        clear_env();

        let config = GatewayConfig::from_env().unwrap();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.per_attempt_timeout, Duration::from_secs(30));
        assert_eq!(config.retry.base_delay, Duration::from_secs(1));
        assert_eq!(config.retry.max_delay, Duration::from_secs(30));
        assert_eq!(config.retry.backoff_factor, 2.0);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.recovery_timeout, Duration::from_secs(60));
        assert_eq!(config.cache.provider, CacheProviderKind::Memory);
        assert!(config.cache.enabled);
        assert_eq!(config.cache.memory.max_entries, 1000);
        assert_eq!(config.cache.ttls.rate_quote, Duration::from_secs(300));
        assert_eq!(config.cache.ttls.health_check, Duration::from_secs(30));
        assert_eq!(config.cache.ttls.purchase, Duration::from_secs(3600));
        assert!(config.easypost.api_key.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let _guard = env_lock().lock().unwrap();
        clear_env();
        std::env::set_var("PROVIDER_EASYPOST_API_KEY", "ep_key");
        std::env::set_var("PROVIDER_EASYPOST_BASE_URL", "https://ep.test/v2");
        std::env::set_var("PROVIDER_MAX_RETRIES", "5");
        std::env::set_var("PROVIDER_BACKOFF_FACTOR", "1.5");
        std::env::set_var("CACHE_PROVIDER", "remote");
        std::env::set_var("CACHE_ENABLED", "false");
        std::env::set_var("REMOTE_CACHE_HOST", "cache.internal");
        std::env::set_var("REMOTE_CACHE_PORT", "6380");
        std::env::set_var("REMOTE_CACHE_KEY_PREFIX", "gw:");

        let config = GatewayConfig::from_env().unwrap();
        assert_eq!(config.easypost.api_key.as_deref(), Some("ep_key"));
        assert_eq!(
            config.settings_for(Provider::EasyPost).base_url.as_deref(),
            Some("https://ep.test/v2")
        );
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.backoff_factor, 1.5);
        assert_eq!(config.cache.provider, CacheProviderKind::Remote);
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.remote.host, "cache.internal");
        assert_eq!(config.cache.remote.port, 6380);
        assert_eq!(config.cache.remote.key_prefix, "gw:");

        clear_env();
    }

    #[test]
    fn empty_api_key_leaves_the_adapter_off() {
        let _guard = env_lock().lock().unwrap();
        clear_env();
        std::env::set_var("PROVIDER_SHIPPO_API_KEY", "");

        let config = GatewayConfig::from_env().unwrap();
        assert!(config.shippo.api_key.is_none());

        clear_env();
    }

    #[test]
    fn malformed_numbers_are_configuration_errors() {
        let _guard = env_lock().lock().unwrap();
        clear_env();
        std::env::set_var("PROVIDER_MAX_RETRIES", "many");

        let error = GatewayConfig::from_env().unwrap_err();
        assert!(matches!(error.kind, ErrorKind::Configuration));

        clear_env();
    }

    #[test]
    fn cache_provider_parsing_is_case_insensitive() {
        assert_eq!(
            "Remote".parse::<CacheProviderKind>().unwrap(),
            CacheProviderKind::Remote
        );
        assert!("disk".parse::<CacheProviderKind>().is_err());
    }
}
