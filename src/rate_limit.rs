//! Admission-control primitives.
//!
//! Neither limiter is wired into the adapter pipeline. The sliding window
//! is consumed by the HTTP edge with identifiers of its choosing (hashed
//! API key, client IP); the token bucket exists for adapters that must
//! respect an upstream's per-second cap.

use crate::time::{Clock, MonotonicClock};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed {
        /// Requests left in the current window after this one.
        remaining: u32,
    },
    Denied {
        /// Suggested wait until the window rolls over.
        retry_after: Duration,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct SlidingWindowConfig {
    pub window: Duration,
    pub max_requests: u32,
}

impl Default for SlidingWindowConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_requests: 100,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at_ms: u64,
    count: u32,
}

/// Per-identifier sliding-window counter. A window starts on the first
/// request after the previous one expired; requests beyond
/// `max_requests` are denied until it rolls over.
pub struct SlidingWindowLimiter {
    config: SlidingWindowConfig,
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<String, Window>>,
}

impl SlidingWindowLimiter {
    pub fn new(config: SlidingWindowConfig) -> Self {
        Self {
            config,
            clock: Arc::new(MonotonicClock::default()),
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Admit or deny one request for `identifier`.
    pub fn check(&self, identifier: &str) -> Decision {
        let now = self.clock.now_millis();
        let window_ms = self.config.window.as_millis() as u64;
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let window = windows
            .entry(identifier.to_string())
            .or_insert(Window {
                started_at_ms: now,
                count: 0,
            });
        if now.saturating_sub(window.started_at_ms) >= window_ms {
            window.started_at_ms = now;
            window.count = 0;
        }

        if window.count < self.config.max_requests {
            window.count += 1;
            Decision::Allowed {
                remaining: self.config.max_requests - window.count,
            }
        } else {
            let window_end = window.started_at_ms + window_ms;
            Decision::Denied {
                retry_after: Duration::from_millis(window_end.saturating_sub(now)),
            }
        }
    }

    /// Drop windows that ended before now. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let now = self.clock.now_millis();
        let window_ms = self.config.window.as_millis() as u64;
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = windows.len();
        windows.retain(|_, window| now.saturating_sub(window.started_at_ms) < window_ms);
        before - windows.len()
    }

    /// Identifiers currently tracked.
    pub fn tracked(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill_ms: u64,
}

/// Token bucket with continuous refill, for matching an upstream's
/// request-per-second cap.
pub struct TokenBucket {
    capacity: f64,
    refill_per_ms: f64,
    clock: Arc<dyn Clock>,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// A bucket holding `capacity` tokens, refilled at `refill_per_ms`
    /// tokens per millisecond. Starts full.
    pub fn new(capacity: u32, refill_per_ms: f64) -> Self {
        Self {
            capacity: capacity as f64,
            refill_per_ms,
            clock: Arc::new(MonotonicClock::default()),
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill_ms: 0,
            }),
        }
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Take `permits` tokens if available.
    pub fn try_consume(&self, permits: u32) -> bool {
        let now = self.clock.now_millis();
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let elapsed = now.saturating_sub(state.last_refill_ms) as f64;
        state.tokens = (state.tokens + elapsed * self.refill_per_ms).min(self.capacity);
        state.last_refill_ms = now;

        let cost = permits as f64;
        if state.tokens >= cost {
            state.tokens -= cost;
            true
        } else {
            false
        }
    }
}
