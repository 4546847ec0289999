//! Carrier adapters and the resilience pipeline they share.
//!
//! Every adapter translates the normalized model to and from one
//! upstream's wire format; everything else — cache consultation, retry,
//! breaker accounting, invalidation on purchase — lives in
//! [`ProviderPipeline`] and behaves identically across carriers.

use crate::cache::{self, keys, CacheBackend, CacheTtls};
use crate::circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig};
use crate::error::{ErrorKind, GatewayError};
use crate::model::{
    Provider, PurchaseRequest, PurchaseResult, RateQuote, RequestContext, ShipmentInput,
};
use crate::retry::{RetryConfig, RetryExecutor};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

mod easypost;
mod shippo;
mod veeqo;

pub use easypost::EasyPostAdapter;
pub use shippo::ShippoAdapter;
pub use veeqo::VeeqoAdapter;

/// Per-provider deployment settings.
#[derive(Debug, Clone, Default)]
pub struct AdapterSettings {
    /// Absent key means the adapter is not enabled.
    pub api_key: Option<String>,
    /// Overrides the adapter's default upstream base URL.
    pub base_url: Option<String>,
    /// Administrative kill-switch independent of the key.
    pub disabled: bool,
}

/// Uniform adapter contract. The registry fans out over these; all
/// resilience lives behind [`ProviderPipeline`], none in the registry.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// True iff an API key is configured and the adapter is not
    /// administratively disabled.
    fn enabled(&self) -> bool;

    async fn quote(
        &self,
        ctx: &RequestContext,
        input: &ShipmentInput,
    ) -> Result<Vec<RateQuote>, GatewayError>;

    async fn purchase(
        &self,
        ctx: &RequestContext,
        request: &PurchaseRequest,
    ) -> Result<PurchaseResult, GatewayError>;

    /// Never fails; upstream trouble is `false`.
    async fn health_check(&self, ctx: &RequestContext) -> bool;

    /// Observability view of the adapter's breaker.
    fn breaker_snapshot(&self) -> BreakerSnapshot;
}

/// The retry → breaker → cache plumbing shared by all adapters. Each
/// adapter owns one pipeline; nothing is shared across providers.
pub struct ProviderPipeline {
    provider: Provider,
    executor: RetryExecutor,
    breaker: CircuitBreaker,
    cache: Option<Arc<dyn CacheBackend>>,
    ttls: CacheTtls,
}

impl ProviderPipeline {
    pub fn new(
        provider: Provider,
        retry: RetryConfig,
        breaker: CircuitBreakerConfig,
        cache: Option<Arc<dyn CacheBackend>>,
        ttls: CacheTtls,
    ) -> Self {
        Self {
            provider,
            executor: RetryExecutor::new(retry),
            breaker: CircuitBreaker::new(provider.as_str(), breaker),
            cache,
            ttls,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Build an error bound to this provider and the caller's correlation id.
    pub fn error(
        &self,
        ctx: &RequestContext,
        operation: &'static str,
        kind: ErrorKind,
    ) -> GatewayError {
        GatewayError::with_correlation(kind, operation, ctx.correlation_id.clone())
            .with_provider(self.provider)
    }

    /// Run one upstream call through retry and the breaker, no caching.
    pub async fn call<T, Fut, Op>(
        &self,
        ctx: &RequestContext,
        operation: &'static str,
        op: Op,
    ) -> Result<T, GatewayError>
    where
        T: Send,
        Fut: Future<Output = Result<T, GatewayError>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        self.executor
            .execute(ctx, &self.breaker, self.provider, operation, op)
            .await
    }

    /// Cached quote flow: consult the rate-quote key, fetch through the
    /// pipeline on a miss, then write back. Cache trouble on either side
    /// degrades to an uncached call.
    pub async fn quote_cached<Fut, Op>(
        &self,
        ctx: &RequestContext,
        input: &ShipmentInput,
        fetch: Op,
    ) -> Result<Vec<RateQuote>, GatewayError>
    where
        Fut: Future<Output = Result<Vec<RateQuote>, GatewayError>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let key = keys::rate_quote_key(self.provider, input);
        if let Some(backend) = &self.cache {
            if let Some(rates) = cache::get_json::<Vec<RateQuote>>(backend.as_ref(), &key).await {
                tracing::debug!(provider = %self.provider, key = %key, "rate quote served from cache");
                return Ok(rates);
            }
        }

        let rates = self.call(ctx, "quote", fetch).await?;

        if let Some(backend) = &self.cache {
            cache::set_json(backend.as_ref(), &key, &rates, Some(self.ttls.rate_quote)).await;
        }
        Ok(rates)
    }

    /// Purchase flow: replay an already-completed purchase for the same
    /// rate within the purchase TTL, otherwise buy through the pipeline,
    /// record the result, and drop this provider's cached quotes.
    pub async fn purchase_guarded<Fut, Op>(
        &self,
        ctx: &RequestContext,
        rate_id: &str,
        buy: Op,
    ) -> Result<PurchaseResult, GatewayError>
    where
        Fut: Future<Output = Result<PurchaseResult, GatewayError>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let key = keys::purchase_key(self.provider, rate_id);
        if let Some(backend) = &self.cache {
            if let Some(result) = cache::get_json::<PurchaseResult>(backend.as_ref(), &key).await {
                tracing::debug!(
                    provider = %self.provider,
                    rate_id,
                    "purchase already completed, replaying recorded result"
                );
                return Ok(result);
            }
        }

        let result = self.call(ctx, "purchase", buy).await?;

        if let Some(backend) = &self.cache {
            cache::set_json(backend.as_ref(), &key, &result, Some(self.ttls.purchase)).await;
        }
        self.invalidate_rate_quotes().await;
        Ok(result)
    }

    /// Cached health flow. The probe's errors never escape; the cached or
    /// fresh boolean is the whole story.
    pub async fn health_cached<Fut, Op>(&self, _ctx: &RequestContext, mut probe: Op) -> bool
    where
        Fut: Future<Output = Result<(), GatewayError>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let key = keys::health_key(self.provider);
        if let Some(backend) = &self.cache {
            if let Some(healthy) = cache::get_json::<bool>(backend.as_ref(), &key).await {
                return healthy;
            }
        }

        let healthy = match probe().await {
            Ok(()) => true,
            Err(error) => {
                tracing::debug!(provider = %self.provider, %error, "health probe failed");
                false
            }
        };

        if let Some(backend) = &self.cache {
            cache::set_json(
                backend.as_ref(),
                &key,
                &healthy,
                Some(self.ttls.health_check),
            )
            .await;
        }
        healthy
    }

    /// Delete every cached rate quote for this provider. Failures during
    /// invalidation are logged and otherwise ignored.
    pub async fn invalidate_rate_quotes(&self) {
        let Some(backend) = &self.cache else {
            return;
        };
        let pattern = keys::rate_quote_pattern(self.provider);
        let stale = backend.keys(Some(&pattern)).await;
        if stale.is_empty() {
            return;
        }
        let mut removed = 0usize;
        for key in &stale {
            if backend.delete(key).await {
                removed += 1;
            }
        }
        tracing::debug!(
            provider = %self.provider,
            removed,
            stale = stale.len(),
            "invalidated cached rate quotes after purchase"
        );
    }
}
