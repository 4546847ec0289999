//! EasyPost adapter.
//!
//! Quoting creates a shipment and reads its embedded rate list; purchase
//! buys one rate on an existing shipment, which is why `shipment_id` is a
//! hard prerequisite here.

use super::{AdapterSettings, ProviderAdapter, ProviderPipeline};
use crate::circuit_breaker::BreakerSnapshot;
use crate::error::{ErrorKind, GatewayError};
use crate::model::{
    minor_units_from_decimal, Address, Provider, PurchaseRequest, PurchaseResult, RateQuote,
    RequestContext, ShipmentInput,
};
use crate::transport::{Transport, TransportRequest, TransportResponse};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct EasyPostAdapter {
    settings: AdapterSettings,
    base_url: String,
    pipeline: ProviderPipeline,
    transport: Arc<dyn Transport>,
}

impl EasyPostAdapter {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.easypost.com/v2";

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

    fn api_key(&self) -> &str {
        self.settings.api_key.as_deref().unwrap_or_default()
    }

    fn request(&self, request: TransportRequest) -> TransportRequest {
        request.basic_auth(self.api_key())
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
                provider = %Provider::EasyPost,
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
        let mut shipment = json!({
            "to_address": wire_address(&input.to),
            "from_address": wire_address(&input.from),
            "parcel": {
                "length": length,
                "width": width,
                "height": height,
                "weight": input.parcel.weight_oz(),
            },
        });
        if let Some(reference) = &input.reference {
            shipment["reference"] = json!(reference);
        }

        let response = self
            .send(
                ctx,
                "quote",
                TransportRequest::post(
                    format!("{}/shipments", self.base_url),
                    json!({ "shipment": shipment }),
                ),
            )
            .await?;

        let body = response.json().map_err(|error| {
            self.pipeline
                .error(ctx, "quote", ErrorKind::from(&error))
                .with_source(error)
        })?;
        let shipment_id = body["id"].as_str().unwrap_or_default().to_string();
        let rates = body["rates"]
            .as_array()
            .map(|rates| normalize_rates(rates, &shipment_id))
            .unwrap_or_default();
        Ok(rates)
    }

    async fn buy_label(
        &self,
        ctx: &RequestContext,
        shipment_id: &str,
        rate_id: &str,
    ) -> Result<PurchaseResult, GatewayError> {
        let response = self
            .send(
                ctx,
                "purchase",
                TransportRequest::post(
                    format!("{}/shipments/{}/buy", self.base_url, shipment_id),
                    json!({ "rate": { "id": rate_id } }),
                ),
            )
            .await?;

        let body = response.json().map_err(|error| {
            self.pipeline
                .error(ctx, "purchase", ErrorKind::from(&error))
                .with_source(error)
        })?;

        let result = PurchaseResult {
            provider: Provider::EasyPost,
            shipment_id: body["id"]
                .as_str()
                .unwrap_or(shipment_id)
                .to_string(),
            label_url: non_empty(body["postage_label"]["label_url"].as_str()),
            tracking_code: non_empty(body["tracking_code"].as_str()),
            tracking_url: non_empty(body["tracker"]["public_url"].as_str()),
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

fn wire_address(address: &Address) -> Value {
    json!({
        "name": address.name,
        "company": address.company,
        "street1": address.street1,
        "street2": address.street2,
        "city": address.city,
        "state": address.state,
        "zip": address.zip,
        "country": address.country,
        "phone": address.phone,
        "email": address.email,
    })
}

fn normalize_rates(rates: &[Value], shipment_id: &str) -> Vec<RateQuote> {
    rates
        .iter()
        .filter_map(|rate| {
            let amount = minor_units_from_decimal(rate["rate"].as_str()?)?;
            Some(RateQuote {
                provider: Provider::EasyPost,
                rate_id: rate["id"].as_str()?.to_string(),
                shipment_id: shipment_id.to_string(),
                service: rate["service"].as_str().unwrap_or_default().to_string(),
                carrier: rate["carrier"].as_str().unwrap_or_default().to_string(),
                amount,
                currency: rate["currency"]
                    .as_str()
                    .unwrap_or("USD")
                    .to_ascii_uppercase(),
                est_delivery_days: rate["delivery_days"].as_u64().map(|days| days as u32),
                service_type: None,
                sub_carrier_id: None,
            })
        })
        .collect()
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|s| !s.is_empty()).map(str::to_string)
}

#[async_trait]
impl ProviderAdapter for EasyPostAdapter {
    fn provider(&self) -> Provider {
        Provider::EasyPost
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
        let Some(shipment_id) = request.shipment_id.as_deref() else {
            return Err(self.pipeline.error(
                ctx,
                "purchase",
                ErrorKind::Validation {
                    field: "shipment_id",
                    value: None,
                },
            ));
        };
        self.pipeline
            .purchase_guarded(ctx, &request.rate_id, || {
                self.buy_label(ctx, shipment_id, &request.rate_id)
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
                    TransportRequest::get(format!("{}/account", self.base_url)),
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
