//! Error taxonomy, retryability, and upstream failure classification.
//!
//! Every failure the core surfaces is a [`GatewayError`]: one [`ErrorKind`]
//! variant plus provider/operation/correlation metadata. The classifier
//! here is the single place raw transport failures become taxonomy values;
//! nothing downstream parses error messages to decide retry policy.

use crate::circuit_breaker::CircuitState;
use crate::model::Provider;
use crate::transport::TransportError;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Classified failure kinds. Retryability is derivable from the variant.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    /// Transport or HTTP-level failure. 5xx and connection failures are
    /// retryable; 4xx (other than 429/401/403) are not.
    Network {
        retryable: bool,
        http_status: Option<u16>,
    },
    /// An attempt or ambient deadline elapsed.
    Timeout { duration: Duration },
    /// Upstream said 429; `retry_after` comes from the `Retry-After` header.
    RateLimit { retry_after: Option<Duration> },
    /// 401/403 — bad or missing credentials.
    Authentication,
    /// The circuit breaker refused the call without contacting upstream.
    CircuitOpen { state: CircuitState },
    /// A prerequisite on the request was missing or malformed.
    Validation {
        field: &'static str,
        value: Option<String>,
    },
    /// Unknown provider, disabled adapter, or malformed process config.
    Configuration,
    /// A cache operation failed. Never fatal to the enclosing operation.
    Cache {
        op: &'static str,
        key: Option<String>,
    },
    /// Upstream reported an exhausted account quota.
    Quota {
        limit: Option<u64>,
        current: Option<u64>,
    },
    /// Upstream is down for maintenance or shedding load.
    ServiceUnavailable { retry_after: Option<Duration> },
}

impl ErrorKind {
    /// Whether the retry executor may attempt the operation again.
    pub fn retryable(&self) -> bool {
        match self {
            ErrorKind::Network { retryable, .. } => *retryable,
            ErrorKind::Timeout { .. }
            | ErrorKind::RateLimit { .. }
            | ErrorKind::ServiceUnavailable { .. } => true,
            ErrorKind::Authentication
            | ErrorKind::CircuitOpen { .. }
            | ErrorKind::Validation { .. }
            | ErrorKind::Configuration
            | ErrorKind::Cache { .. }
            | ErrorKind::Quota { .. } => false,
        }
    }

    /// Short stable label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Network { .. } => "network",
            ErrorKind::Timeout { .. } => "timeout",
            ErrorKind::RateLimit { .. } => "rate_limit",
            ErrorKind::Authentication => "authentication",
            ErrorKind::CircuitOpen { .. } => "circuit_open",
            ErrorKind::Validation { .. } => "validation",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Cache { .. } => "cache",
            ErrorKind::Quota { .. } => "quota",
            ErrorKind::ServiceUnavailable { .. } => "service_unavailable",
        }
    }

    /// Classify a response with an HTTP status code.
    pub fn from_status(status: u16, retry_after: Option<Duration>) -> Self {
        match status {
            500..=599 => ErrorKind::Network {
                retryable: true,
                http_status: Some(status),
            },
            429 => ErrorKind::RateLimit { retry_after },
            401 | 403 => ErrorKind::Authentication,
            _ => ErrorKind::Network {
                retryable: false,
                http_status: Some(status),
            },
        }
    }

    /// Classify a raw failure that carries only a message.
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("quota") || lower.contains("limit exceeded") {
            ErrorKind::Quota {
                limit: None,
                current: None,
            }
        } else if lower.contains("service unavailable") || lower.contains("maintenance") {
            ErrorKind::ServiceUnavailable { retry_after: None }
        } else {
            ErrorKind::Network {
                retryable: true,
                http_status: None,
            }
        }
    }
}

impl From<&TransportError> for ErrorKind {
    fn from(err: &TransportError) -> Self {
        match err {
            TransportError::Connect { .. } => ErrorKind::Network {
                retryable: true,
                http_status: None,
            },
            TransportError::TimedOut { elapsed } => ErrorKind::Timeout { duration: *elapsed },
            TransportError::Body { message } => ErrorKind::from_message(message),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Network {
                retryable,
                http_status,
            } => {
                let class = if *retryable { "retryable" } else { "permanent" };
                match http_status {
                    Some(status) => write!(f, "network error (http {}, {})", status, class),
                    None => write!(f, "network error ({})", class),
                }
            }
            ErrorKind::Timeout { duration } => write!(f, "timed out after {:?}", duration),
            ErrorKind::RateLimit { retry_after } => match retry_after {
                Some(wait) => write!(f, "rate limited, retry after {:?}", wait),
                None => write!(f, "rate limited"),
            },
            ErrorKind::Authentication => write!(f, "authentication failed"),
            ErrorKind::CircuitOpen { state } => write!(f, "circuit breaker {}", state),
            ErrorKind::Validation { field, value } => match value {
                Some(value) => write!(f, "invalid {}: {:?}", field, value),
                None => write!(f, "missing required field {}", field),
            },
            ErrorKind::Configuration => write!(f, "configuration error"),
            ErrorKind::Cache { op, key } => match key {
                Some(key) => write!(f, "cache {} failed for key {}", op, key),
                None => write!(f, "cache {} failed", op),
            },
            ErrorKind::Quota { limit, .. } => match limit {
                Some(limit) => write!(f, "quota exceeded (limit {})", limit),
                None => write!(f, "quota exceeded"),
            },
            ErrorKind::ServiceUnavailable { .. } => write!(f, "service unavailable"),
        }
    }
}

/// A classified failure with its request metadata attached.
#[derive(Debug)]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub provider: Option<Provider>,
    pub operation: &'static str,
    pub correlation_id: String,
    pub timestamp_ms: u64,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl GatewayError {
    /// Build an error with a freshly generated correlation id.
    pub fn new(kind: ErrorKind, operation: &'static str) -> Self {
        Self::with_correlation(kind, operation, next_correlation_id())
    }

    /// Build an error carrying the caller's correlation id.
    pub fn with_correlation(
        kind: ErrorKind,
        operation: &'static str,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            provider: None,
            operation,
            correlation_id: correlation_id.into(),
            timestamp_ms: epoch_millis(),
            source: None,
        }
    }

    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn retryable(&self) -> bool {
        self.kind.retryable()
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self.kind, ErrorKind::CircuitOpen { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self.kind, ErrorKind::Validation { .. })
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.provider {
            Some(provider) => write!(
                f,
                "{} failed for {}: {} [{}]",
                self.operation, provider, self.kind, self.correlation_id
            ),
            None => write!(
                f,
                "{} failed: {} [{}]",
                self.operation, self.kind, self.correlation_id
            ),
        }
    }
}

impl std::error::Error for GatewayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|source| source as &(dyn std::error::Error + 'static))
    }
}

static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a process-unique correlation id, used whenever the caller did
/// not supply one.
pub fn next_correlation_id() -> String {
    let counter = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("corr-{}-{}", epoch_millis(), counter)
}

pub(crate) fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification_follows_the_table() {
        assert_eq!(
            ErrorKind::from_status(503, None),
            ErrorKind::Network {
                retryable: true,
                http_status: Some(503)
            }
        );
        assert_eq!(
            ErrorKind::from_status(429, Some(Duration::from_secs(2))),
            ErrorKind::RateLimit {
                retry_after: Some(Duration::from_secs(2))
            }
        );
        assert_eq!(ErrorKind::from_status(401, None), ErrorKind::Authentication);
        assert_eq!(ErrorKind::from_status(403, None), ErrorKind::Authentication);
        assert_eq!(
            ErrorKind::from_status(422, None),
            ErrorKind::Network {
                retryable: false,
                http_status: Some(422)
            }
        );
    }

    #[test]
    fn message_classification_sniffs_quota_and_maintenance() {
        assert!(matches!(
            ErrorKind::from_message("Monthly API quota reached"),
            ErrorKind::Quota { .. }
        ));
        assert!(matches!(
            ErrorKind::from_message("request limit exceeded for account"),
            ErrorKind::Quota { .. }
        ));
        assert!(matches!(
            ErrorKind::from_message("503 Service Unavailable"),
            ErrorKind::ServiceUnavailable { .. }
        ));
        assert!(matches!(
            ErrorKind::from_message("scheduled MAINTENANCE window"),
            ErrorKind::ServiceUnavailable { .. }
        ));
        assert_eq!(
            ErrorKind::from_message("connection reset by peer"),
            ErrorKind::Network {
                retryable: true,
                http_status: None
            }
        );
    }

    #[test]
    fn transport_errors_classify_by_variant() {
        let connect = TransportError::Connect {
            message: "dns lookup failed".into(),
        };
        assert_eq!(
            ErrorKind::from(&connect),
            ErrorKind::Network {
                retryable: true,
                http_status: None
            }
        );

        let timed_out = TransportError::TimedOut {
            elapsed: Duration::from_secs(30),
        };
        assert_eq!(
            ErrorKind::from(&timed_out),
            ErrorKind::Timeout {
                duration: Duration::from_secs(30)
            }
        );

        let body = TransportError::Body {
            message: "quota exhausted".into(),
        };
        assert!(matches!(ErrorKind::from(&body), ErrorKind::Quota { .. }));
    }

    #[test]
    fn retryability_matrix() {
        let retryable = [
            ErrorKind::Network {
                retryable: true,
                http_status: Some(500),
            },
            ErrorKind::Timeout {
                duration: Duration::from_secs(1),
            },
            ErrorKind::RateLimit { retry_after: None },
            ErrorKind::ServiceUnavailable { retry_after: None },
        ];
        for kind in retryable {
            assert!(kind.retryable(), "{:?} should be retryable", kind);
        }

        let permanent = [
            ErrorKind::Network {
                retryable: false,
                http_status: Some(404),
            },
            ErrorKind::Authentication,
            ErrorKind::CircuitOpen {
                state: CircuitState::Open,
            },
            ErrorKind::Validation {
                field: "shipment_id",
                value: None,
            },
            ErrorKind::Configuration,
            ErrorKind::Quota {
                limit: None,
                current: None,
            },
        ];
        for kind in permanent {
            assert!(!kind.retryable(), "{:?} should not be retryable", kind);
        }
    }

    #[test]
    fn correlation_ids_are_unique_and_prefixed() {
        let a = next_correlation_id();
        let b = next_correlation_id();
        assert!(a.starts_with("corr-"));
        assert_ne!(a, b);
    }

    #[test]
    fn errors_carry_caller_correlation_ids() {
        let err = GatewayError::with_correlation(ErrorKind::Authentication, "purchase", "req-42")
            .with_provider(Provider::EasyPost);
        assert_eq!(err.correlation_id, "req-42");
        assert!(err.timestamp_ms > 0);
        let rendered = err.to_string();
        assert!(rendered.contains("purchase"));
        assert!(rendered.contains("easypost"));
        assert!(rendered.contains("req-42"));
    }

    #[test]
    fn source_chain_is_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = GatewayError::new(
            ErrorKind::Network {
                retryable: true,
                http_status: None,
            },
            "quote",
        )
        .with_source(io);
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "reset");
    }
}
