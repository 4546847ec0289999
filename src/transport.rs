//! Upstream HTTP seam.
//!
//! Adapters describe one round-trip as a [`TransportRequest`] and get back
//! either a [`TransportResponse`] (any status code) or a
//! [`TransportError`] for failures below HTTP. The split matters for
//! classification: status codes are classified by the error module's
//! status table, transport failures by variant.

use async_trait::async_trait;
use http::Method;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// One upstream HTTP round-trip, provider-agnostic.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Option<serde_json::Value>,
    /// HTTP basic auth with an empty password (EasyPost-style API keys).
    pub basic_auth_user: Option<String>,
}

impl TransportRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            basic_auth_user: None,
        }
    }

    pub fn post(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            headers: Vec::new(),
            body: Some(body),
            basic_auth_user: None,
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn basic_auth(mut self, user: impl Into<String>) -> Self {
        self.basic_auth_user = Some(user.into());
        self
    }
}

/// Upstream reply with any status code; adapters decide what is an error.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    /// Parsed `Retry-After` header (seconds), when the upstream sent one.
    pub retry_after: Option<Duration>,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Result<serde_json::Value, TransportError> {
        serde_json::from_slice(&self.body).map_err(|error| TransportError::Body {
            message: format!("malformed response body: {}", error),
        })
    }

    /// Bounded excerpt of the body for error messages and logs.
    pub fn body_excerpt(&self) -> String {
        const LIMIT: usize = 500;
        let text = String::from_utf8_lossy(&self.body);
        text.chars().take(LIMIT).collect()
    }
}

/// Failure before an HTTP status existed.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// DNS, TLS, or TCP-level failure.
    #[error("connection failed: {message}")]
    Connect { message: String },
    /// The client-side request deadline elapsed.
    #[error("request timed out after {elapsed:?}")]
    TimedOut { elapsed: Duration },
    /// The exchange completed but the payload was unusable.
    #[error("{message}")]
    Body { message: String },
}

/// A single upstream round-trip. One implementation speaks real HTTP;
/// tests substitute scripted responses.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: TransportRequest)
        -> Result<TransportResponse, TransportError>;
}

/// Production transport backed by reqwest with rustls.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// `request_timeout` bounds the whole exchange; the retry executor
    /// enforces its own per-attempt budget on top.
    pub fn new(request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(
        &self,
        request: TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value.as_str());
        }
        if let Some(user) = &request.basic_auth_user {
            builder = builder.basic_auth(user, None::<&str>);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(classify_reqwest)?;
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response
            .bytes()
            .await
            .map_err(classify_reqwest)?
            .to_vec();

        Ok(TransportResponse {
            status,
            retry_after,
            body,
        })
    }
}

fn classify_reqwest(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::TimedOut {
            elapsed: Duration::ZERO,
        }
    } else if error.is_connect() || error.is_request() {
        TransportError::Connect {
            message: error.to_string(),
        }
    } else {
        TransportError::Body {
            message: error.to_string(),
        }
    }
}

/// Test transport replaying a queue of canned outcomes. The final queued
/// outcome repeats once the queue drains, so "always fails" scripts are a
/// single push.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
    requests: Mutex<Vec<TransportRequest>>,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, status: u16, body: serde_json::Value) -> &Self {
        self.push(Ok(TransportResponse {
            status,
            retry_after: None,
            body: body.to_string().into_bytes(),
        }))
    }

    pub fn push_error(&self, error: TransportError) -> &Self {
        self.push(Err(error))
    }

    pub fn push(&self, outcome: Result<TransportResponse, TransportError>) -> &Self {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(outcome);
        self
    }

    /// Number of round-trips issued so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request issued, in order.
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(
        &self,
        request: TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request);

        let mut script = self
            .script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if script.len() > 1 {
            script.pop_front().expect("script is non-empty")
        } else if let Some(outcome) = script.front() {
            outcome.clone()
        } else {
            Err(TransportError::Connect {
                message: "scripted transport exhausted".to_string(),
            })
        }
    }
}
