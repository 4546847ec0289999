//! Veeqo adapter.
//!
//! Veeqo prices shipments against an existing allocation, so the opaque
//! `allocation_id` extra is mandatory for purchase and forwarded on quotes
//! when present. Its API expects inches and ounces regardless of the
//! caller's units; conversion happens here and never reaches the cache
//! key, which hashes the input as given.

use super::{AdapterSettings, ProviderAdapter, ProviderPipeline};
use crate::circuit_breaker::BreakerSnapshot;
use crate::error::{ErrorKind, GatewayError};
use crate::model::{
    minor_units_from_f64, Provider, PurchaseRequest, PurchaseResult, RateQuote, RequestContext,
    ShipmentInput, EXTRA_ALLOCATION_ID,
};
use crate::transport::{Transport, TransportRequest, TransportResponse};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct VeeqoAdapter {
    settings: AdapterSettings,
    base_url: String,
    pipeline: ProviderPipeline,
    transport: Arc<dyn Transport>,
}

impl VeeqoAdapter {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.veeqo.com";

    pub fn new(
        settings: AdapterSettings,
        pipeline: ProviderPipeline,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let base_url = settings
            .base_url
            .clone()
            .unwrap_or_else(|| Self::DEFAULT_BASE_URL.to_string());
        Self {
            settings,
            base_url,
            pipeline,
            transport,
        }
    }

    fn request(&self, request: TransportRequest) -> TransportRequest {
        let key = self.settings.api_key.as_deref().unwrap_or_default();
        request.header("x-api-key", key.to_string())
    }

    async fn send(
        &self,
        ctx: &RequestContext,
        operation: &'static str,
        request: TransportRequest,
    ) -> Result<TransportResponse, GatewayError> {
        let response = self
            .transport
            .execute(self.request(request))
            .await
            .map_err(|error| {
                self.pipeline
                    .error(ctx, operation, ErrorKind::from(&error))
                    .with_source(error)
            })?;
        if !response.is_success() {
            tracing::warn!(
                provider = %Provider::Veeqo,
                operation,
                status = response.status,
                body = %response.body_excerpt(),
                "upstream returned an error status"
            );
            return Err(self.pipeline.error(
                ctx,
                operation,
                ErrorKind::from_status(response.status, response.retry_after),
            ));
        }
        Ok(response)
    }

    async fn fetch_rates(
        &self,
        ctx: &RequestContext,
        input: &ShipmentInput,
    ) -> Result<Vec<RateQuote>, GatewayError> {
        let (length, width, height) = input.parcel.dimensions_in();
        let mut body = json!({
            "parcel": {
                "length": length,
                "width": width,
                "height": height,
                "weight": input.parcel.weight_oz(),
                "dimensions_unit": "in",
                "weight_unit": "oz",
            },
        });
        let allocation = input.provider_extras.get(EXTRA_ALLOCATION_ID);
        if let Some(allocation_id) = allocation {
            body["allocation_id"] = json!(allocation_id);
        }

        let response = self
            .send(
                ctx,
                "quote",
                TransportRequest::post(format!("{}/shipping/quotes", self.base_url), body),
            )
            .await?;

        let parsed = response.json().map_err(|error| {
            self.pipeline
                .error(ctx, "quote", ErrorKind::from(&error))
                .with_source(error)
        })?;
        let shipment_id = allocation.cloned().unwrap_or_default();
        Ok(parsed
            .as_array()
            .map(|rows| normalize_rates(rows, &shipment_id))
            .unwrap_or_default())
    }

    async fn book_shipment(
        &self,
        ctx: &RequestContext,
        allocation_id: &str,
        rate_id: &str,
        sub_carrier_id: Option<&str>,
    ) -> Result<PurchaseResult, GatewayError> {
        let mut body = json!({
            "allocation_id": allocation_id,
            "remote_shipment_id": rate_id,
        });
        if let Some(sub_carrier) = sub_carrier_id {
            body["sub_carrier_id"] = json!(sub_carrier);
        }

        let response = self
            .send(
                ctx,
                "purchase",
                TransportRequest::post(format!("{}/shipments", self.base_url), body),
            )
            .await?;

        let parsed = response.json().map_err(|error| {
            self.pipeline
                .error(ctx, "purchase", ErrorKind::from(&error))
                .with_source(error)
        })?;

        let result = PurchaseResult {
            provider: Provider::Veeqo,
            shipment_id: parsed["id"]
                .as_u64()
                .map(|id| id.to_string())
                .or_else(|| parsed["id"].as_str().map(str::to_string))
                .unwrap_or_else(|| allocation_id.to_string()),
            label_url: non_empty(parsed["label"]["url"].as_str()),
            tracking_code: non_empty(parsed["tracking_number"]["value"].as_str()),
            tracking_url: non_empty(parsed["tracking_url"].as_str()),
        };
        if result.label_url.is_none() && result.tracking_url.is_none() {
            return Err(self.pipeline.error(
                ctx,
                "purchase",
                ErrorKind::Network {
                    retryable: false,
                    http_status: None,
                },
            ));
        }
        Ok(result)
    }
}

fn normalize_rates(rows: &[Value], shipment_id: &str) -> Vec<RateQuote> {
    rows.iter()
        .filter_map(|row| {
            let amount = minor_units_from_f64(row["base_rate"].as_f64()?)?;
            Some(RateQuote {
                provider: Provider::Veeqo,
                rate_id: row["remote_shipment_id"].as_str()?.to_string(),
                shipment_id: shipment_id.to_string(),
                service: row["name"].as_str().unwrap_or_default().to_string(),
                carrier: row["carrier"].as_str().unwrap_or_default().to_string(),
                amount,
                currency: row["currency"]
                    .as_str()
                    .unwrap_or("USD")
                    .to_ascii_uppercase(),
                est_delivery_days: None,
                service_type: row["service_type"].as_str().map(str::to_string),
                sub_carrier_id: row["sub_carrier_id"]
                    .as_u64()
                    .map(|id| id.to_string())
                    .or_else(|| row["sub_carrier_id"].as_str().map(str::to_string)),
            })
        })
        .collect()
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|s| !s.is_empty()).map(str::to_string)
}

#[async_trait]
impl ProviderAdapter for VeeqoAdapter {
    fn provider(&self) -> Provider {
        Provider::Veeqo
    }

    fn enabled(&self) -> bool {
        self.settings.api_key.is_some() && !self.settings.disabled
    }

    async fn quote(
        &self,
        ctx: &RequestContext,
        input: &ShipmentInput,
    ) -> Result<Vec<RateQuote>, GatewayError> {
        if !self.enabled() {
            return Err(self.pipeline.error(ctx, "quote", ErrorKind::Configuration));
        }
        self.pipeline
            .quote_cached(ctx, input, || self.fetch_rates(ctx, input))
            .await
    }

    async fn purchase(
        &self,
        ctx: &RequestContext,
        request: &PurchaseRequest,
    ) -> Result<PurchaseResult, GatewayError> {
        if !self.enabled() {
            return Err(self
                .pipeline
                .error(ctx, "purchase", ErrorKind::Configuration));
        }
        let Some(allocation_id) = request.extras.get(EXTRA_ALLOCATION_ID) else {
            return Err(self.pipeline.error(
                ctx,
                "purchase",
                ErrorKind::Validation {
                    field: "allocation_id",
                    value: None,
                },
            ));
        };
        let sub_carrier_id = request.extras.get("sub_carrier_id").map(String::as_str);
        self.pipeline
            .purchase_guarded(ctx, &request.rate_id, || {
                self.book_shipment(ctx, allocation_id, &request.rate_id, sub_carrier_id)
            })
            .await
    }

    async fn health_check(&self, ctx: &RequestContext) -> bool {
        if !self.enabled() {
            return false;
        }
        self.pipeline
            .health_cached(ctx, || async {
                self.send(
                    ctx,
                    "health_check",
                    TransportRequest::get(format!("{}/current_user", self.base_url)),
                )
                .await
                .map(|_| ())
            })
            .await
    }

    fn breaker_snapshot(&self) -> BreakerSnapshot {
        self.pipeline.breaker().snapshot()
    }
}
