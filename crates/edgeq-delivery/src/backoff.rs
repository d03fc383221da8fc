//! Reconnect backoff.
//!
//! ```text
//! delay(k) = min(max, base * 2^k)
//! jittered(k) = min(max, delay(k) + U[0, delay(k) * jitter])
//! ```
//!
//! `k` is the number of consecutive failed connects; after a loss from a
//! healthy connection `k` is 0 and the first retry waits `base`.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with proportional jitter, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Fraction of the delay added as random jitter, in `[0, 1]`.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
            jitter: 0.1,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            base,
            max,
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// Delay before the next attempt, without jitter.
    pub fn delay_for(&self, failures: u32) -> Duration {
        2u32.checked_pow(failures)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// Delay before the next attempt with jitter applied. Never exceeds `max`.
    pub fn jittered_delay_for<R: Rng + ?Sized>(&self, failures: u32, rng: &mut R) -> Duration {
        let delay = self.delay_for(failures);
        if self.jitter <= 0.0 {
            return delay;
        }
        let factor = rng.gen_range(0.0..=self.jitter);
        let extra = Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(self.max);
        delay.saturating_add(extra).min(self.max)
    }
}
