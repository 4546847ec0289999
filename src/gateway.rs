//! The assembled gateway: config in, three entry points out.
//!
//! `Gateway` is the explicit bundle the process constructs once and
//! passes by reference — cache backend, per-provider pipelines, registry,
//! health service. No global state.

use crate::adapters::{EasyPostAdapter, ProviderPipeline, ShippoAdapter, VeeqoAdapter};
use crate::cache::{CacheBackend, MemoryCache, RedisCache};
use crate::config::{CacheProviderKind, GatewayConfig};
use crate::error::GatewayError;
use crate::health::{HealthReport, HealthService};
use crate::model::{Provider, PurchaseRequest, PurchaseResult, RateQuote, RequestContext, ShipmentInput};
use crate::registry::ProviderRegistry;
use crate::transport::{HttpTransport, Transport};
use std::sync::Arc;

pub struct Gateway {
    registry: Arc<ProviderRegistry>,
    health: HealthService,
    cache: Option<Arc<dyn CacheBackend>>,
}

impl Gateway {
    /// Build from the process environment with the real HTTP transport.
    /// Requires a tokio runtime (the in-memory cache spawns its sweeper).
    pub fn from_env() -> Result<Self, GatewayError> {
        let config = GatewayConfig::from_env()?;
        let transport = Arc::new(HttpTransport::new(config.retry.per_attempt_timeout));
        Self::new(config, transport)
    }

    /// Build from explicit configuration and transport. Tests inject a
    /// scripted transport here.
    pub fn new(config: GatewayConfig, transport: Arc<dyn Transport>) -> Result<Self, GatewayError> {
        let cache: Option<Arc<dyn CacheBackend>> = if config.cache.enabled {
            Some(match config.cache.provider {
                CacheProviderKind::Memory => {
                    Arc::new(MemoryCache::new(config.cache.memory.clone()))
                }
                CacheProviderKind::Remote => {
                    Arc::new(RedisCache::new(config.cache.remote.clone())?)
                }
            })
        } else {
            None
        };

        let pipeline = |provider: Provider| {
            ProviderPipeline::new(
                provider,
                config.retry.clone(),
                config.breaker.clone(),
                cache.clone(),
                config.cache.ttls.clone(),
            )
        };

        let registry = Arc::new(
            ProviderRegistry::builder()
                .register(Arc::new(EasyPostAdapter::new(
                    config.easypost.clone(),
                    pipeline(Provider::EasyPost),
                    transport.clone(),
                )))
                .register(Arc::new(ShippoAdapter::new(
                    config.shippo.clone(),
                    pipeline(Provider::Shippo),
                    transport.clone(),
                )))
                .register(Arc::new(VeeqoAdapter::new(
                    config.veeqo.clone(),
                    pipeline(Provider::Veeqo),
                    transport,
                )))
                .build(),
        );

        Ok(Self {
            health: HealthService::new(registry.clone()),
            registry,
            cache,
        })
    }

    /// Fan-out quote across every enabled provider. Never fails; partial
    /// upstream trouble shows up only as missing rates.
    pub async fn quote(&self, ctx: &RequestContext, input: &ShipmentInput) -> Vec<RateQuote> {
        self.registry.all_quotes(ctx, input).await
    }

    /// Purchase one rate against one provider.
    pub async fn purchase(
        &self,
        ctx: &RequestContext,
        provider: Provider,
        request: &PurchaseRequest,
    ) -> Result<PurchaseResult, GatewayError> {
        self.registry.purchase(ctx, provider, request).await
    }

    /// Aggregate health across enabled providers. Never fails.
    pub async fn health(&self, ctx: &RequestContext) -> HealthReport {
        self.health.report(ctx).await
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> Option<&Arc<dyn CacheBackend>> {
        self.cache.as_ref()
    }

    /// Release long-lived resources (remote cache connection). The
    /// in-memory sweeper stops when the cache drops.
    pub async fn shutdown(&self) {
        if let Some(cache) = &self.cache {
            cache.shutdown().await;
        }
    }
}
