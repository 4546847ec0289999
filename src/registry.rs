//! Provider registry: adapter ownership and fan-out/fan-in.
//!
//! The registry is built once and read-only afterwards. It neither
//! retries nor caches — every resilience concern lives inside the
//! adapters it owns.

use crate::adapters::ProviderAdapter;
use crate::error::{ErrorKind, GatewayError};
use crate::model::{Provider, PurchaseRequest, PurchaseResult, RateQuote, RequestContext, ShipmentInput};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct ProviderRegistryBuilder {
    adapters: Vec<Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistryBuilder {
    pub fn register(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn build(self) -> ProviderRegistry {
        ProviderRegistry {
            adapters: self.adapters,
        }
    }
}

/// Owns one adapter per configured provider.
pub struct ProviderRegistry {
    adapters: Vec<Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::default()
    }

    pub fn adapters(&self) -> &[Arc<dyn ProviderAdapter>] {
        &self.adapters
    }

    pub fn adapter(&self, provider: Provider) -> Option<&Arc<dyn ProviderAdapter>> {
        self.adapters
            .iter()
            .find(|adapter| adapter.provider() == provider)
    }

    fn enabled(&self) -> impl Iterator<Item = &Arc<dyn ProviderAdapter>> {
        self.adapters.iter().filter(|adapter| adapter.enabled())
    }

    /// Quote every enabled adapter concurrently and wait for all of them.
    /// A failing adapter contributes nothing; the merged result is sorted
    /// ascending by amount (stable for equal amounts). Never fails.
    pub async fn all_quotes(
        &self,
        ctx: &RequestContext,
        input: &ShipmentInput,
    ) -> Vec<RateQuote> {
        let legs = self.enabled().map(|adapter| async move {
            let provider = adapter.provider();
            match adapter.quote(ctx, input).await {
                Ok(rates) => {
                    tracing::debug!(provider = %provider, rates = rates.len(), "adapter quoted");
                    rates
                }
                Err(error) => {
                    tracing::warn!(
                        provider = %provider,
                        %error,
                        "adapter failed during fan-out, contributing no rates"
                    );
                    Vec::new()
                }
            }
        });

        let mut merged: Vec<RateQuote> = join_all(legs).await.into_iter().flatten().collect();
        merged.sort_by_key(|rate| rate.amount);
        merged
    }

    /// Route a purchase to the named adapter. Unknown or disabled
    /// providers are configuration errors; adapter errors pass through
    /// unchanged.
    pub async fn purchase(
        &self,
        ctx: &RequestContext,
        provider: Provider,
        request: &PurchaseRequest,
    ) -> Result<PurchaseResult, GatewayError> {
        let adapter = self.adapter(provider).ok_or_else(|| {
            GatewayError::with_correlation(
                ErrorKind::Configuration,
                "purchase",
                ctx.correlation_id.clone(),
            )
            .with_provider(provider)
        })?;
        if !adapter.enabled() {
            return Err(GatewayError::with_correlation(
                ErrorKind::Configuration,
                "purchase",
                ctx.correlation_id.clone(),
            )
            .with_provider(provider));
        }
        adapter.purchase(ctx, request).await
    }

    /// Health-check every enabled adapter concurrently. Never fails.
    pub async fn health_check_all(&self, ctx: &RequestContext) -> HashMap<Provider, bool> {
        let checks = self.enabled().map(|adapter| async move {
            (adapter.provider(), adapter.health_check(ctx).await)
        });
        join_all(checks).await.into_iter().collect()
    }
}
