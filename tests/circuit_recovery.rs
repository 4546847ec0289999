//! Circuit trip and recovery through the adapter pipeline.

mod common;

use common::*;
use multiship::adapters::{ProviderAdapter, ShippoAdapter};
use multiship::{
    CircuitBreakerConfig, CircuitState, Provider, RequestContext, ScriptedTransport,
    TransportError,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn tripping_shippo(
    transport: Arc<ScriptedTransport>,
    recovery: Duration,
) -> ShippoAdapter {
    ShippoAdapter::new(
        settings("shippo_token", "https://shippo.test"),
        pipeline(
            Provider::Shippo,
            fast_retry(1),
            CircuitBreakerConfig {
                failure_threshold: 5,
                recovery_timeout: recovery,
                half_open_max_calls: 1,
            },
            None,
        ),
        transport,
    )
}

#[tokio::test]
async fn five_failures_trip_the_breaker_and_the_sixth_call_is_instant() {
    trace_init();
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_error(TransportError::Connect {
        message: "connection reset".into(),
    });
    let adapter = tripping_shippo(transport.clone(), Duration::from_secs(600));
    let ctx = RequestContext::new();

    for _ in 0..5 {
        let error = adapter.quote(&ctx, &shipment()).await.unwrap_err();
        assert!(!error.is_circuit_open());
    }
    assert_eq!(transport.calls(), 5);
    assert_eq!(adapter.breaker_snapshot().state, CircuitState::Open);

    let started = Instant::now();
    let error = adapter.quote(&ctx, &shipment()).await.unwrap_err();
    assert!(error.is_circuit_open());
    assert!(!error.retryable());
    assert_eq!(transport.calls(), 5, "no upstream call while open");
    assert!(
        started.elapsed() < Duration::from_millis(50),
        "fail-fast, not a network timeout"
    );
}

#[tokio::test]
async fn successful_probe_after_the_recovery_window_closes_the_circuit() {
    trace_init();
    let transport = Arc::new(ScriptedTransport::new());
    for _ in 0..5 {
        transport.push_error(TransportError::Connect {
            message: "connection reset".into(),
        });
    }
    transport.push_response(200, shippo_rates("ship_A", &[("sh_1", "7.49")]));
    let adapter = tripping_shippo(transport.clone(), Duration::from_millis(100));
    let ctx = RequestContext::new();

    for _ in 0..5 {
        let _ = adapter.quote(&ctx, &shipment()).await.unwrap_err();
    }
    assert_eq!(adapter.breaker_snapshot().state, CircuitState::Open);

    tokio::time::sleep(Duration::from_millis(150)).await;

    // The probe is admitted, succeeds, and the circuit closes.
    let rates = adapter.quote(&ctx, &shipment()).await.unwrap();
    assert_eq!(rates.len(), 1);
    assert_eq!(adapter.breaker_snapshot().state, CircuitState::Closed);

    // Subsequent calls flow normally.
    let rates = adapter.quote(&ctx, &shipment()).await.unwrap();
    assert_eq!(rates.len(), 1);
}

#[tokio::test]
async fn failed_probe_reopens_the_circuit() {
    trace_init();
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_error(TransportError::Connect {
        message: "connection reset".into(),
    });
    let adapter = tripping_shippo(transport.clone(), Duration::from_millis(100));
    let ctx = RequestContext::new();

    for _ in 0..5 {
        let _ = adapter.quote(&ctx, &shipment()).await.unwrap_err();
    }
    tokio::time::sleep(Duration::from_millis(150)).await;

    // Probe admitted, fails against the still-broken upstream.
    let error = adapter.quote(&ctx, &shipment()).await.unwrap_err();
    assert!(!error.is_circuit_open(), "the probe itself reached upstream");
    assert_eq!(transport.calls(), 6);
    assert_eq!(adapter.breaker_snapshot().state, CircuitState::Open);

    // And the circuit refuses again without an upstream call.
    let error = adapter.quote(&ctx, &shipment()).await.unwrap_err();
    assert!(error.is_circuit_open());
    assert_eq!(transport.calls(), 6);
}
