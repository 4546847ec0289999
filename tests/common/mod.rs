//! Shared fixtures for the scenario tests.
#![allow(dead_code)] // each test binary uses a different subset

use multiship::adapters::{
    AdapterSettings, EasyPostAdapter, ProviderPipeline, ShippoAdapter, VeeqoAdapter,
};
use multiship::{
    CacheBackend, CacheTtls, CircuitBreakerConfig, MemoryCache, MemoryCacheConfig, Provider,
    RetryConfig, ScriptedTransport, ShipmentInput,
};
use std::sync::Arc;
use std::time::Duration;

/// Route crate logs to the test writer so breaker transitions and cache
/// warnings show up under `cargo test -- --nocapture`. Idempotent.
pub fn trace_init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn shipment() -> ShipmentInput {
    serde_json::from_value(serde_json::json!({
        "to": {
            "name": "Pat Doe",
            "street1": "1 Main St",
            "city": "Brooklyn",
            "state": "NY",
            "zip": "11201",
            "country": "US"
        },
        "from": {
            "company": "Acme Outfitters",
            "street1": "2 Market St",
            "city": "San Francisco",
            "state": "CA",
            "zip": "94103",
            "country": "US"
        },
        "parcel": {"length": 10.0, "width": 8.0, "height": 4.0, "weight": 16.0}
    }))
    .expect("fixture shipment deserializes")
}

/// One-attempt retry policy with a tiny backoff so failure tests stay fast.
pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(10),
        backoff_factor: 2.0,
        per_attempt_timeout: Duration::from_secs(5),
    }
}

pub fn memory_cache() -> Arc<dyn CacheBackend> {
    Arc::new(MemoryCache::new(MemoryCacheConfig {
        max_entries: 256,
        cleanup_interval: None,
    }))
}

pub fn pipeline(
    provider: Provider,
    retry: RetryConfig,
    breaker: CircuitBreakerConfig,
    cache: Option<Arc<dyn CacheBackend>>,
) -> ProviderPipeline {
    ProviderPipeline::new(provider, retry, breaker, cache, CacheTtls::default())
}

pub fn settings(key: &str, base_url: &str) -> AdapterSettings {
    AdapterSettings {
        api_key: Some(key.to_string()),
        base_url: Some(base_url.to_string()),
        disabled: false,
    }
}

pub fn easypost(
    transport: Arc<ScriptedTransport>,
    retry: RetryConfig,
    cache: Option<Arc<dyn CacheBackend>>,
) -> EasyPostAdapter {
    EasyPostAdapter::new(
        settings("ep_key", "https://easypost.test/v2"),
        pipeline(
            Provider::EasyPost,
            retry,
            CircuitBreakerConfig::default(),
            cache,
        ),
        transport,
    )
}

pub fn shippo(
    transport: Arc<ScriptedTransport>,
    retry: RetryConfig,
    cache: Option<Arc<dyn CacheBackend>>,
) -> ShippoAdapter {
    ShippoAdapter::new(
        settings("shippo_token", "https://shippo.test"),
        pipeline(
            Provider::Shippo,
            retry,
            CircuitBreakerConfig::default(),
            cache,
        ),
        transport,
    )
}

pub fn veeqo(
    transport: Arc<ScriptedTransport>,
    retry: RetryConfig,
    cache: Option<Arc<dyn CacheBackend>>,
) -> VeeqoAdapter {
    VeeqoAdapter::new(
        settings("vq_key", "https://veeqo.test"),
        pipeline(
            Provider::Veeqo,
            retry,
            CircuitBreakerConfig::default(),
            cache,
        ),
        transport,
    )
}

pub fn easypost_rates(shipment_id: &str, rates: &[(&str, &str, u32)]) -> serde_json::Value {
    serde_json::json!({
        "id": shipment_id,
        "rates": rates
            .iter()
            .map(|(id, amount, days)| serde_json::json!({
                "id": id,
                "service": "Service",
                "carrier": "CarrierX",
                "rate": amount,
                "currency": "USD",
                "delivery_days": days,
            }))
            .collect::<Vec<_>>(),
    })
}

pub fn shippo_rates(shipment_id: &str, rates: &[(&str, &str)]) -> serde_json::Value {
    serde_json::json!({
        "object_id": shipment_id,
        "rates": rates
            .iter()
            .map(|(id, amount)| serde_json::json!({
                "object_id": id,
                "amount": amount,
                "currency": "USD",
                "provider": "CarrierY",
                "servicelevel": {"name": "Ground", "token": "gnd"},
                "estimated_days": 4,
            }))
            .collect::<Vec<_>>(),
    })
}
