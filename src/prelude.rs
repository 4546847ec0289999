//! Convenient re-exports for typical gateway usage.

pub use crate::adapters::{AdapterSettings, ProviderAdapter, ProviderPipeline};
pub use crate::{
    CacheBackend, CacheTtls, CircuitBreaker, CircuitBreakerConfig, CircuitState, ErrorKind,
    Gateway, GatewayConfig, GatewayError, HealthReport, HealthStatus, Provider, ProviderRegistry,
    PurchaseRequest, PurchaseResult, RateQuote, RequestContext, RetryConfig, RetryExecutor,
    ShipmentInput, Transport,
};
