//! Per-adapter circuit breaker.
//!
//! Lock-free three-state machine (closed / open / half-open). Each adapter
//! owns exactly one breaker; the retry executor asks it before every
//! attempt and reports the outcome afterwards. Transitions are serialized
//! with compare-and-swap so concurrent callers observe a consistent
//! closed → open → half-open → closed sequence.

use crate::error::ErrorKind;
use crate::time::{Clock, MonotonicClock};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        })
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in the closed state that open the circuit.
    pub failure_threshold: usize,
    /// How long the circuit stays open before admitting probes.
    pub recovery_timeout: Duration,
    /// Probe budget in the half-open state; this many consecutive
    /// successes close the circuit again.
    pub half_open_max_calls: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        }
    }
}

/// Read-only view of the breaker for observability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: usize,
    /// Monotonic milliseconds of the failure that opened the circuit;
    /// zero when the circuit has never opened.
    pub last_failure_at_ms: u64,
    pub half_open_probes: usize,
}

struct BreakerState {
    state: AtomicU8,
    failures: AtomicUsize,
    last_failure_at: AtomicU64,
    half_open_in_flight: AtomicUsize,
    half_open_successes: AtomicUsize,
}

/// Failure isolator owned by a single adapter. Cloning shares state.
#[derive(Clone)]
pub struct CircuitBreaker {
    label: &'static str,
    shared: Arc<BreakerState>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    /// `label` names the owning adapter in transition logs.
    pub fn new(label: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            label,
            shared: Arc::new(BreakerState {
                state: AtomicU8::new(STATE_CLOSED),
                failures: AtomicUsize::new(0),
                last_failure_at: AtomicU64::new(0),
                half_open_in_flight: AtomicUsize::new(0),
                half_open_successes: AtomicUsize::new(0),
            }),
            config,
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    /// Override the clock for deterministic tests.
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Ask for admission. A refusal means the upstream was never contacted
    /// and must not be reported back via [`CircuitBreaker::on_failure`].
    pub fn try_acquire(&self) -> Result<(), ErrorKind> {
        loop {
            match self.shared.state.load(Ordering::Acquire) {
                STATE_CLOSED => return Ok(()),
                STATE_OPEN => {
                    let opened_at = self.shared.last_failure_at.load(Ordering::Acquire);
                    let elapsed = self.clock.now_millis().saturating_sub(opened_at);
                    if elapsed < self.config.recovery_timeout.as_millis() as u64 {
                        return Err(ErrorKind::CircuitOpen {
                            state: CircuitState::Open,
                        });
                    }
                    match self.shared.state.compare_exchange(
                        STATE_OPEN,
                        STATE_HALF_OPEN,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            self.shared.half_open_in_flight.store(1, Ordering::Release);
                            self.shared.half_open_successes.store(0, Ordering::Release);
                            tracing::info!(
                                breaker = self.label,
                                from = %CircuitState::Open,
                                to = %CircuitState::HalfOpen,
                                "recovery timeout elapsed, admitting probe"
                            );
                            return Ok(());
                        }
                        // Lost the race; re-read whatever state won.
                        Err(_) => continue,
                    }
                }
                STATE_HALF_OPEN => {
                    let in_flight = self.shared.half_open_in_flight.fetch_add(1, Ordering::AcqRel);
                    if in_flight >= self.config.half_open_max_calls {
                        self.shared.half_open_in_flight.fetch_sub(1, Ordering::Release);
                        return Err(ErrorKind::CircuitOpen {
                            state: CircuitState::HalfOpen,
                        });
                    }
                    return Ok(());
                }
                _ => unreachable!("invalid circuit breaker state"),
            }
        }
    }

    /// Report a successful call that was previously admitted.
    pub fn on_success(&self) {
        match self.shared.state.load(Ordering::Acquire) {
            STATE_CLOSED => {
                self.shared.failures.store(0, Ordering::Release);
            }
            STATE_HALF_OPEN => {
                self.release_probe();
                let successes = self.shared.half_open_successes.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.config.half_open_max_calls
                    && self
                        .shared
                        .state
                        .compare_exchange(
                            STATE_HALF_OPEN,
                            STATE_CLOSED,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                {
                    self.shared.failures.store(0, Ordering::Release);
                    self.shared.half_open_successes.store(0, Ordering::Release);
                    tracing::info!(
                        breaker = self.label,
                        from = %CircuitState::HalfOpen,
                        to = %CircuitState::Closed,
                        probes = successes,
                        "probes succeeded"
                    );
                }
            }
            _ => {}
        }
    }

    /// Report a failed call that was previously admitted.
    pub fn on_failure(&self) {
        match self.shared.state.load(Ordering::Acquire) {
            STATE_CLOSED => {
                let failures = self.shared.failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.config.failure_threshold
                    && self
                        .shared
                        .state
                        .compare_exchange(
                            STATE_CLOSED,
                            STATE_OPEN,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                {
                    self.shared
                        .last_failure_at
                        .store(self.clock.now_millis(), Ordering::Release);
                    tracing::warn!(
                        breaker = self.label,
                        from = %CircuitState::Closed,
                        to = %CircuitState::Open,
                        failures,
                        threshold = self.config.failure_threshold,
                        "failure threshold reached"
                    );
                }
            }
            STATE_HALF_OPEN => {
                self.release_probe();
                if self
                    .shared
                    .state
                    .compare_exchange(
                        STATE_HALF_OPEN,
                        STATE_OPEN,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.shared
                        .last_failure_at
                        .store(self.clock.now_millis(), Ordering::Release);
                    tracing::warn!(
                        breaker = self.label,
                        from = %CircuitState::HalfOpen,
                        to = %CircuitState::Open,
                        "probe failed"
                    );
                }
            }
            _ => {}
        }
    }

    /// Current state without side effects.
    pub fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            state: CircuitState::from_raw(self.shared.state.load(Ordering::Acquire)),
            consecutive_failures: self.shared.failures.load(Ordering::Acquire),
            last_failure_at_ms: self.shared.last_failure_at.load(Ordering::Acquire),
            half_open_probes: self.shared.half_open_in_flight.load(Ordering::Acquire),
        }
    }

    /// Force the breaker closed with zeroed counters. For operators and
    /// tests only; production recovery goes through the half-open path.
    pub fn reset(&self) {
        self.shared.state.store(STATE_CLOSED, Ordering::Release);
        self.shared.failures.store(0, Ordering::Release);
        self.shared.last_failure_at.store(0, Ordering::Release);
        self.shared.half_open_in_flight.store(0, Ordering::Release);
        self.shared.half_open_successes.store(0, Ordering::Release);
        tracing::info!(breaker = self.label, "breaker reset to closed");
    }

    fn release_probe(&self) {
        // Clamp at zero: a completion may race a reset.
        let _ = self
            .shared
            .half_open_in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            });
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("label", &self.label)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}
