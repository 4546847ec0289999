//! Shippo adapter.
//!
//! Shippo takes parcels in whatever units the caller declares, so the
//! normalized input passes through untouched; only the field names change.

use super::{AdapterSettings, ProviderAdapter, ProviderPipeline};
use crate::circuit_breaker::BreakerSnapshot;
use crate::error::{ErrorKind, GatewayError};
use crate::model::{
    minor_units_from_decimal, Address, DistanceUnit, MassUnit, Provider, PurchaseRequest,
    PurchaseResult, RateQuote, RequestContext, ShipmentInput,
};
use crate::transport::{Transport, TransportRequest, TransportResponse};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct ShippoAdapter {
    settings: AdapterSettings,
    base_url: String,
    pipeline: ProviderPipeline,
    transport: Arc<dyn Transport>,
}

impl ShippoAdapter {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.goshippo.com";

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
        let token = self.settings.api_key.as_deref().unwrap_or_default();
        request.header("authorization", format!("ShippoToken {}", token))
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
                provider = %Provider::Shippo,
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
        let response = self
            .send(
                ctx,
                "quote",
                TransportRequest::post(
                    format!("{}/shipments", self.base_url),
                    json!({
                        "address_from": wire_address(&input.from),
                        "address_to": wire_address(&input.to),
                        "parcels": [{
                            "length": input.parcel.length,
                            "width": input.parcel.width,
                            "height": input.parcel.height,
                            "weight": input.parcel.weight,
                            "distance_unit": unit_token(input.parcel.distance_unit),
                            "mass_unit": mass_token(input.parcel.mass_unit),
                        }],
                        "async": false,
                    }),
                ),
            )
            .await?;

        let body = response.json().map_err(|error| {
            self.pipeline
                .error(ctx, "quote", ErrorKind::from(&error))
                .with_source(error)
        })?;
        let shipment_id = body["object_id"].as_str().unwrap_or_default().to_string();
        let rates = body["rates"]
            .as_array()
            .map(|rates| normalize_rates(rates, &shipment_id))
            .unwrap_or_default();
        Ok(rates)
    }

    async fn buy_label(
        &self,
        ctx: &RequestContext,
        rate_id: &str,
        fallback_shipment_id: Option<&str>,
    ) -> Result<PurchaseResult, GatewayError> {
        let response = self
            .send(
                ctx,
                "purchase",
                TransportRequest::post(
                    format!("{}/transactions", self.base_url),
                    json!({
                        "rate": rate_id,
                        "label_file_type": "PDF",
                        "async": false,
                    }),
                ),
            )
            .await?;

        let body = response.json().map_err(|error| {
            self.pipeline
                .error(ctx, "purchase", ErrorKind::from(&error))
                .with_source(error)
        })?;

        let result = PurchaseResult {
            provider: Provider::Shippo,
            shipment_id: body["object_id"]
                .as_str()
                .or(fallback_shipment_id)
                .unwrap_or_default()
                .to_string(),
            label_url: non_empty(body["label_url"].as_str()),
            tracking_code: non_empty(body["tracking_number"].as_str()),
            tracking_url: non_empty(body["tracking_url_provider"].as_str()),
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

fn unit_token(unit: DistanceUnit) -> &'static str {
    match unit {
        DistanceUnit::In => "in",
        DistanceUnit::Cm => "cm",
    }
}

fn mass_token(unit: MassUnit) -> &'static str {
    match unit {
        MassUnit::Oz => "oz",
        MassUnit::Lb => "lb",
        MassUnit::G => "g",
        MassUnit::Kg => "kg",
    }
}

fn normalize_rates(rates: &[Value], shipment_id: &str) -> Vec<RateQuote> {
    rates
        .iter()
        .filter_map(|rate| {
            let amount = minor_units_from_decimal(rate["amount"].as_str()?)?;
            Some(RateQuote {
                provider: Provider::Shippo,
                rate_id: rate["object_id"].as_str()?.to_string(),
                shipment_id: shipment_id.to_string(),
                service: rate["servicelevel"]["name"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
                carrier: rate["provider"].as_str().unwrap_or_default().to_string(),
                amount,
                currency: rate["currency"]
                    .as_str()
                    .unwrap_or("USD")
                    .to_ascii_uppercase(),
                est_delivery_days: rate["estimated_days"].as_u64().map(|days| days as u32),
                service_type: rate["servicelevel"]["token"]
                    .as_str()
                    .map(str::to_string),
                sub_carrier_id: None,
            })
        })
        .collect()
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|s| !s.is_empty()).map(str::to_string)
}

#[async_trait]
impl ProviderAdapter for ShippoAdapter {
    fn provider(&self) -> Provider {
        Provider::Shippo
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
        if request.rate_id.is_empty() {
            return Err(self.pipeline.error(
                ctx,
                "purchase",
                ErrorKind::Validation {
                    field: "rate_id",
                    value: None,
                },
            ));
        }
        self.pipeline
            .purchase_guarded(ctx, &request.rate_id, || {
                self.buy_label(ctx, &request.rate_id, request.shipment_id.as_deref())
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
                    TransportRequest::get(format!("{}/addresses?results=1", self.base_url)),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheTtls;
    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::model::Parcel;
    use crate::retry::RetryConfig;
    use crate::transport::{ScriptedTransport, TransportError};
    use std::time::Duration;

    fn adapter(transport: Arc<ScriptedTransport>, max_attempts: u32) -> ShippoAdapter {
        ShippoAdapter::new(
            AdapterSettings {
                api_key: Some("shippo_test_token".into()),
                base_url: Some("https://shippo.test".into()),
                disabled: false,
            },
            ProviderPipeline::new(
                Provider::Shippo,
                RetryConfig {
                    max_attempts,
                    base_delay: Duration::from_millis(1),
                    ..RetryConfig::default()
                },
                CircuitBreakerConfig::default(),
                None,
                CacheTtls::default(),
            ),
            transport,
        )
    }

    fn input() -> ShipmentInput {
        ShipmentInput {
            to: Address {
                name: None,
                company: None,
                street1: "1 Main St".into(),
                street2: None,
                city: "Brooklyn".into(),
                state: Some("NY".into()),
                zip: "11201".into(),
                country: "US".into(),
                phone: None,
                email: None,
            },
            from: Address {
                name: None,
                company: None,
                street1: "2 Market St".into(),
                street2: None,
                city: "San Francisco".into(),
                state: Some("CA".into()),
                zip: "94103".into(),
                country: "US".into(),
                phone: None,
                email: None,
            },
            parcel: Parcel {
                length: 25.0,
                width: 20.0,
                height: 10.0,
                weight: 0.5,
                distance_unit: DistanceUnit::Cm,
                mass_unit: MassUnit::Kg,
            },
            reference: None,
            provider_extras: Default::default(),
        }
    }

    #[tokio::test]
    async fn quote_passes_units_through_and_normalizes() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_response(
            200,
            serde_json::json!({
                "object_id": "ship_A1",
                "rates": [
                    {"object_id": "rate_gnd", "amount": "7.49", "currency": "usd",
                     "provider": "UPS",
                     "servicelevel": {"name": "Ground", "token": "ups_ground"},
                     "estimated_days": 4}
                ]
            }),
        );
        let adapter = adapter(transport.clone(), 1);
        let ctx = RequestContext::new();

        let rates = adapter.quote(&ctx, &input()).await.unwrap();
        assert_eq!(rates.len(), 1);
        assert_eq!(rates[0].amount, 749);
        assert_eq!(rates[0].carrier, "UPS");
        assert_eq!(rates[0].service, "Ground");
        assert_eq!(rates[0].service_type.as_deref(), Some("ups_ground"));
        assert_eq!(rates[0].shipment_id, "ship_A1");

        let sent = transport.requests();
        let body = sent[0].body.as_ref().unwrap();
        // Original units travel on the wire for Shippo.
        assert_eq!(body["parcels"][0]["distance_unit"], "cm");
        assert_eq!(body["parcels"][0]["mass_unit"], "kg");
        assert_eq!(body["parcels"][0]["weight"], 0.5);
        assert_eq!(body["async"], false);
        assert!(sent[0]
            .headers
            .iter()
            .any(|(name, value)| *name == "authorization"
                && value == "ShippoToken shippo_test_token"));
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_error(TransportError::Connect {
            message: "connection reset".into(),
        });
        transport.push_response(
            200,
            serde_json::json!({"object_id": "ship_A1", "rates": []}),
        );
        let adapter = adapter(transport.clone(), 3);
        let ctx = RequestContext::new();

        let rates = adapter.quote(&ctx, &input()).await.unwrap();
        assert!(rates.is_empty());
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn rate_limit_errors_carry_retry_after() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(Ok(crate::transport::TransportResponse {
            status: 429,
            retry_after: Some(Duration::from_secs(2)),
            body: b"{}".to_vec(),
        }));
        let adapter = adapter(transport.clone(), 1);
        let ctx = RequestContext::new();

        let error = adapter.quote(&ctx, &input()).await.unwrap_err();
        assert_eq!(
            error.kind,
            ErrorKind::RateLimit {
                retry_after: Some(Duration::from_secs(2))
            }
        );
    }

    #[tokio::test]
    async fn purchase_maps_the_transaction() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_response(
            200,
            serde_json::json!({
                "object_id": "txn_9",
                "label_url": "https://labels.test/txn_9.pdf",
                "tracking_number": "SHIPPO123",
                "tracking_url_provider": "https://track.test/SHIPPO123"
            }),
        );
        let adapter = adapter(transport.clone(), 1);
        let ctx = RequestContext::new();

        let result = adapter
            .purchase(
                &ctx,
                &PurchaseRequest {
                    rate_id: "rate_gnd".into(),
                    shipment_id: None,
                    extras: Default::default(),
                },
            )
            .await
            .unwrap();
        assert_eq!(result.shipment_id, "txn_9");
        assert_eq!(result.tracking_code.as_deref(), Some("SHIPPO123"));

        let sent = transport.requests();
        assert_eq!(sent[0].url, "https://shippo.test/transactions");
        assert_eq!(sent[0].body.as_ref().unwrap()["rate"], "rate_gnd");
    }

    #[tokio::test]
    async fn purchase_with_no_label_or_tracking_is_an_error() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_response(
            200,
            serde_json::json!({"object_id": "txn_9", "label_url": "", "status": "QUEUED"}),
        );
        let adapter = adapter(transport, 1);
        let ctx = RequestContext::new();

        let error = adapter
            .purchase(
                &ctx,
                &PurchaseRequest {
                    rate_id: "rate_gnd".into(),
                    shipment_id: None,
                    extras: Default::default(),
                },
            )
            .await
            .unwrap_err();
        assert!(!error.retryable());
    }
}
