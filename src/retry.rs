//! Bounded retry with per-attempt timeout and breaker consultation.
//!
//! The executor owns the attempt loop for one upstream call: ask the
//! adapter's circuit breaker, race the operation against the per-attempt
//! timer, classify the outcome, and back off between retryable failures.
//! Operations hand back already-classified [`GatewayError`]s — the
//! executor never inspects messages, only the taxonomy.

use crate::backoff::{Backoff, Jitter};
use crate::circuit_breaker::CircuitBreaker;
use crate::error::{ErrorKind, GatewayError};
use crate::model::{Provider, RequestContext};
use crate::time::{Sleeper, TokioSleeper};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first; `1` disables retrying.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub per_attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            per_attempt_timeout: Duration::from_secs(30),
        }
    }
}

/// Runs one logical upstream call to completion or final failure.
#[derive(Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
    backoff: Backoff,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        let backoff = Backoff::new(config.base_delay, config.backoff_factor, config.max_delay);
        Self {
            config,
            backoff,
            jitter: Jitter::None,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Drive `operation` through the breaker, timeout, and backoff loop.
    ///
    /// Every error raised here carries the context's correlation id and
    /// the given provider/operation labels.
    pub async fn execute<T, Fut, Op>(
        &self,
        ctx: &RequestContext,
        breaker: &CircuitBreaker,
        provider: Provider,
        operation_name: &'static str,
        mut operation: Op,
    ) -> Result<T, GatewayError>
    where
        T: Send,
        Fut: Future<Output = Result<T, GatewayError>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        for attempt in 1..=self.config.max_attempts.max(1) {
            if ctx.expired() {
                return Err(self.deadline_error(ctx, provider, operation_name));
            }

            breaker.try_acquire().map_err(|kind| {
                GatewayError::with_correlation(kind, operation_name, ctx.correlation_id.clone())
                    .with_provider(provider)
            })?;

            let attempt_budget = match ctx.remaining() {
                Some(remaining) => remaining.min(self.config.per_attempt_timeout),
                None => self.config.per_attempt_timeout,
            };

            let error = match tokio::time::timeout(attempt_budget, operation()).await {
                Ok(Ok(value)) => {
                    breaker.on_success();
                    return Ok(value);
                }
                Ok(Err(error)) => {
                    breaker.on_failure();
                    error
                }
                Err(_) => {
                    breaker.on_failure();
                    GatewayError::with_correlation(
                        ErrorKind::Timeout {
                            duration: attempt_budget,
                        },
                        operation_name,
                        ctx.correlation_id.clone(),
                    )
                    .with_provider(provider)
                }
            };

            if !error.retryable() || attempt >= self.config.max_attempts {
                return Err(error);
            }

            let delay = self.jitter.apply(self.backoff.delay(attempt));
            tracing::debug!(
                provider = %provider,
                operation = operation_name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error.kind,
                "retrying after backoff"
            );
            // Never sleep across a dead deadline.
            if let Some(remaining) = ctx.remaining() {
                if remaining <= delay {
                    return Err(self.deadline_error(ctx, provider, operation_name));
                }
            }
            self.sleeper.sleep(delay).await;
        }

        unreachable!("retry loop returns on final attempt")
    }

    fn deadline_error(
        &self,
        ctx: &RequestContext,
        provider: Provider,
        operation_name: &'static str,
    ) -> GatewayError {
        GatewayError::with_correlation(
            ErrorKind::Timeout {
                duration: Duration::ZERO,
            },
            operation_name,
            ctx.correlation_id.clone(),
        )
        .with_provider(provider)
    }
}
