//! Deterministic cache-key policy.
//!
//! Rate-quote keys hash a canonical fingerprint of the normalized input,
//! so identical shipments map to identical keys across processes and
//! releases regardless of field order or letter case. Adapters hash the
//! input as given — unit conversions done for a particular wire format
//! never reach the key.

use crate::model::{Provider, ShipmentInput};
use sha2::{Digest, Sha256};

/// `rate:{provider}:{digest}` for a normalized shipment.
pub fn rate_quote_key(provider: Provider, input: &ShipmentInput) -> String {
    format!(
        "rate:{}:{}",
        provider,
        digest(&canonical_fingerprint(provider, input))
    )
}

/// Glob matching every rate-quote key for one provider.
pub fn rate_quote_pattern(provider: Provider) -> String {
    format!("rate:{}:*", provider)
}

/// `health:{provider}`.
pub fn health_key(provider: Provider) -> String {
    format!("health:{}", provider)
}

/// `purchase:{provider}:{rate_id}`.
pub fn purchase_key(provider: Provider, rate_id: &str) -> String {
    format!("purchase:{}:{}", provider, rate_id)
}

fn canonical_fingerprint(provider: Provider, input: &ShipmentInput) -> String {
    let parcel = &input.parcel;
    format!(
        "{}|{}|{}|{}|{}x{}x{}",
        provider,
        address_part(&input.from),
        address_part(&input.to),
        parcel.weight,
        parcel.length,
        parcel.width,
        parcel.height,
    )
}

fn address_part(address: &crate::model::Address) -> String {
    format!(
        "{},{},{},{}",
        address.city.to_lowercase(),
        address
            .state
            .as_deref()
            .unwrap_or_default()
            .to_lowercase(),
        address.zip,
        address.country.to_lowercase(),
    )
}

fn digest(fingerprint: &str) -> String {
    let hash = Sha256::digest(fingerprint.as_bytes());
    let mut hex = String::with_capacity(16);
    for byte in &hash[..8] {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}
