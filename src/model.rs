//! Normalized domain model shared by every adapter.
//!
//! Everything the gateway passes between the HTTP edge, the registry, and
//! the carrier adapters is expressed in these types. Wire formats never
//! leak out of an adapter; amounts are always integer minor units.

use crate::error::next_correlation_id;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// The carriers in the reference deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    EasyPost,
    Shippo,
    Veeqo,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::EasyPost, Provider::Shippo, Provider::Veeqo];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::EasyPost => "easypost",
            Provider::Shippo => "shippo",
            Provider::Veeqo => "veeqo",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned by [`Provider::from_str`] for names outside the deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownProvider(pub String);

impl fmt::Display for UnknownProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown provider: {}", self.0)
    }
}

impl std::error::Error for UnknownProvider {}

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "easypost" => Ok(Provider::EasyPost),
            "shippo" => Ok(Provider::Shippo),
            "veeqo" => Ok(Provider::Veeqo),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

/// Unit of parcel dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceUnit {
    #[default]
    In,
    Cm,
}

const CM_PER_INCH: f64 = 2.54;

impl DistanceUnit {
    /// Convert a value in this unit to inches.
    pub fn to_inches(self, value: f64) -> f64 {
        match self {
            DistanceUnit::In => value,
            DistanceUnit::Cm => value / CM_PER_INCH,
        }
    }

    /// Convert a value in inches back to this unit.
    pub fn from_inches(self, value: f64) -> f64 {
        match self {
            DistanceUnit::In => value,
            DistanceUnit::Cm => value * CM_PER_INCH,
        }
    }
}

/// Unit of parcel weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MassUnit {
    #[default]
    Oz,
    Lb,
    G,
    Kg,
}

const OZ_PER_LB: f64 = 16.0;
const OZ_PER_KG: f64 = 35.273_961_949_580_41;
const OZ_PER_G: f64 = OZ_PER_KG / 1000.0;

impl MassUnit {
    /// Convert a value in this unit to ounces.
    pub fn to_ounces(self, value: f64) -> f64 {
        match self {
            MassUnit::Oz => value,
            MassUnit::Lb => value * OZ_PER_LB,
            MassUnit::G => value * OZ_PER_G,
            MassUnit::Kg => value * OZ_PER_KG,
        }
    }

    /// Convert a value in ounces back to this unit.
    pub fn from_ounces(self, value: f64) -> f64 {
        match self {
            MassUnit::Oz => value,
            MassUnit::Lb => value / OZ_PER_LB,
            MassUnit::G => value / OZ_PER_G,
            MassUnit::Kg => value / OZ_PER_KG,
        }
    }
}

/// A postal address. Immutable for the lifetime of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    pub street1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street2: Option<String>,
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub zip: String,
    /// ISO 3166-1 alpha-2 country code.
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Parcel dimensions and weight, in the units the caller supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parcel {
    pub length: f64,
    pub width: f64,
    pub height: f64,
    pub weight: f64,
    #[serde(default)]
    pub distance_unit: DistanceUnit,
    #[serde(default)]
    pub mass_unit: MassUnit,
}

impl Parcel {
    /// Dimensions as `(length, width, height)` in inches.
    pub fn dimensions_in(&self) -> (f64, f64, f64) {
        (
            self.distance_unit.to_inches(self.length),
            self.distance_unit.to_inches(self.width),
            self.distance_unit.to_inches(self.height),
        )
    }

    /// Weight in ounces.
    pub fn weight_oz(&self) -> f64 {
        self.mass_unit.to_ounces(self.weight)
    }
}

/// One logical shipment request in the normalized schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentInput {
    pub to: Address,
    pub from: Address,
    pub parcel: Parcel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Opaque per-provider identifiers (e.g. a Veeqo allocation id). Flow
    /// through to the named provider without interpretation.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub provider_extras: HashMap<String, String>,
}

/// Key under which a Veeqo allocation id travels in `provider_extras`.
pub const EXTRA_ALLOCATION_ID: &str = "allocation_id";

/// A price-and-service offering from one carrier for one shipment.
///
/// `amount` is always in the currency's minor unit (cents, pence);
/// `(provider, rate_id)` identifies the quote within its TTL window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateQuote {
    pub provider: Provider,
    pub rate_id: String,
    pub shipment_id: String,
    pub service: String,
    pub carrier: String,
    pub amount: i64,
    /// ISO 4217 code, uppercase.
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub est_delivery_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_carrier_id: Option<String>,
}

/// Input to a label purchase against one chosen provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub rate_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipment_id: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extras: HashMap<String, String>,
}

/// Outcome of a successful label purchase. At least one of `label_url`
/// and `tracking_url` is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseResult {
    pub provider: Provider,
    pub shipment_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_url: Option<String>,
}

/// Parse an upstream decimal amount (e.g. `"8.99"`) into minor units,
/// rounding to the nearest integer for two-decimal currencies. Rejects
/// negative and non-finite values.
pub fn minor_units_from_decimal(raw: &str) -> Option<i64> {
    minor_units_from_f64(raw.trim().parse().ok()?)
}

/// Same as [`minor_units_from_decimal`] for amounts already decoded as
/// JSON numbers.
pub fn minor_units_from_f64(value: f64) -> Option<i64> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * 100.0).round() as i64)
}

/// Request-scoped call context: correlation id plus an optional ambient
/// deadline. Created on entry, discarded on reply; fan-out legs share the
/// same correlation id by cloning.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub correlation_id: String,
    pub deadline: Option<Instant>,
}

impl RequestContext {
    /// Fresh context with a generated correlation id and no deadline.
    pub fn new() -> Self {
        Self {
            correlation_id: next_correlation_id(),
            deadline: None,
        }
    }

    /// Context carrying a caller-supplied correlation id.
    pub fn with_correlation_id(id: impl Into<String>) -> Self {
        Self {
            correlation_id: id.into(),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Convenience for "must finish within `budget` from now".
    pub fn deadline_in(self, budget: Duration) -> Self {
        self.with_deadline(Instant::now() + budget)
    }

    /// Time left before the ambient deadline, if one was set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn expired(&self) -> bool {
        self.remaining().is_some_and(|remaining| remaining.is_zero())
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
