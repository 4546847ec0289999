#![forbid(unsafe_code)]

//! # multiship
//!
//! Provider-agnostic shipping gateway core. One normalized shipment
//! request fans out to several third-party carriers, the heterogeneous
//! rate and label responses are normalized into a common schema, and the
//! merged result comes back sorted by price. Label purchase is mediated
//! against one chosen provider.
//!
//! The crate is the resilience and coordination layer between an HTTP
//! edge (not included) and the carrier APIs:
//!
//! - **Registry** ([`ProviderRegistry`]) owning one adapter per carrier
//!   with fan-out quote, single-target purchase, and fan-out health.
//! - **Adapters** (EasyPost, Shippo, Veeqo) translating the normalized
//!   model to and from each upstream's wire format.
//! - **Resilience pipeline** per adapter: bounded retry with exponential
//!   backoff ([`RetryExecutor`]), per-attempt timeout, circuit breaker
//!   ([`CircuitBreaker`]), all consulted in that order for every call.
//! - **Response cache** ([`CacheBackend`]) with an in-process LRU+TTL
//!   backend and a Redis backend, namespaced deterministic keys, and
//!   write-invalidation on purchase. Cache trouble never fails a request.
//! - **Error taxonomy** ([`ErrorKind`], [`GatewayError`]) with explicit
//!   retryability and correlation-id propagation.
//!
//! ## Quick start
//!
//! ```no_run
//! use multiship::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), GatewayError> {
//!     // Reads PROVIDER_*_API_KEY, CACHE_*, and the resilience knobs.
//!     let gateway = Gateway::from_env()?;
//!
//!     let ctx = RequestContext::with_correlation_id("req-42")
//!         .deadline_in(std::time::Duration::from_secs(10));
//!     let input: ShipmentInput = serde_json::from_str(r#"{
//!         "to":   {"street1": "1 Main St", "city": "Brooklyn",
//!                  "state": "NY", "zip": "11201", "country": "US"},
//!         "from": {"street1": "2 Market St", "city": "San Francisco",
//!                  "state": "CA", "zip": "94103", "country": "US"},
//!         "parcel": {"length": 10, "width": 8, "height": 4, "weight": 16}
//!     }"#).expect("valid shipment");
//!
//!     // Cheapest first; failed carriers just contribute nothing.
//!     let rates = gateway.quote(&ctx, &input).await;
//!     if let Some(best) = rates.first() {
//!         let purchase = gateway
//!             .purchase(&ctx, best.provider, &PurchaseRequest {
//!                 rate_id: best.rate_id.clone(),
//!                 shipment_id: Some(best.shipment_id.clone()),
//!                 extras: Default::default(),
//!             })
//!             .await?;
//!         println!("label: {:?}", purchase.label_url);
//!     }
//!
//!     gateway.shutdown().await;
//!     Ok(())
//! }
//! ```

mod backoff;
pub mod cache;
mod circuit_breaker;
mod config;
mod error;
mod gateway;
mod health;
mod model;
mod rate_limit;
mod registry;
mod retry;
mod time;
mod transport;

pub mod adapters;

// Re-exports
pub use backoff::{Backoff, Jitter};
pub use cache::{CacheBackend, CacheStats, CacheTtls, MemoryCache, MemoryCacheConfig, RedisCache, RedisCacheConfig};
pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use config::{CacheProviderKind, CacheSettings, GatewayConfig};
pub use error::{next_correlation_id, ErrorKind, GatewayError};
pub use gateway::Gateway;
pub use health::{aggregate, HealthReport, HealthService, HealthStatus};
pub use model::{
    minor_units_from_decimal, minor_units_from_f64, Address, DistanceUnit, MassUnit, Parcel,
    Provider, PurchaseRequest, PurchaseResult, RateQuote, RequestContext, ShipmentInput,
    UnknownProvider, EXTRA_ALLOCATION_ID,
};
pub use rate_limit::{
    Decision, SlidingWindowConfig, SlidingWindowLimiter, TokenBucket,
};
pub use registry::{ProviderRegistry, ProviderRegistryBuilder};
pub use retry::{RetryConfig, RetryExecutor};
pub use time::{
    Clock, InstantSleeper, ManualClock, MonotonicClock, Sleeper, SystemClock, TokioSleeper,
    TrackingSleeper,
};
pub use transport::{
    HttpTransport, ScriptedTransport, Transport, TransportError, TransportRequest,
    TransportResponse,
};

pub mod prelude;
