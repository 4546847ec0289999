//! Backoff schedule for the retry executor.

use rand::Rng;
use std::time::Duration;

/// Exponential delay schedule: `min(base * factor^(attempt-1), max)`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    factor: f64,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, factor: f64, max: Duration) -> Self {
        Self { base, factor, max }
    }

    /// Delay before the attempt after `attempt` (1-indexed) failed.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let millis = self.base.as_millis() as f64 * self.factor.powi(exponent as i32);
        if !millis.is_finite() || millis >= self.max.as_millis() as f64 {
            self.max
        } else {
            Duration::from_millis(millis.round() as u64).min(self.max)
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2.0,
            max: Duration::from_secs(30),
        }
    }
}

/// Optional perturbation of the schedule to spread synchronized retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Jitter {
    #[default]
    None,
    /// Scale each delay by a random factor in `[0.75, 1.25]`.
    Bounded,
}

impl Jitter {
    pub fn apply(&self, delay: Duration) -> Duration {
        self.apply_with_rng(delay, &mut rand::thread_rng())
    }

    /// Deterministic variant for tests.
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        match self {
            Jitter::None => delay,
            Jitter::Bounded => {
                let scale = rng.gen_range(0.75..=1.25);
                Duration::from_millis((delay.as_millis() as f64 * scale).round() as u64)
            }
        }
    }
}
