//! Reconnection delay curve.

use std::time::Duration;

use rand::Rng;

use crate::config::BackoffConfig;

/// Exponential backoff with bounded random jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub factor: f64,
    pub max: Duration,
    /// Fraction of the computed delay that may be added as jitter.
    pub jitter: f64,
    /// Attempt counter ceiling. Retries continue past it at the capped delay.
    pub attempt_ceiling: u32,
}

impl BackoffPolicy {
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_ms),
            factor: config.factor,
            max: Duration::from_millis(config.max_ms),
            jitter: config.jitter,
            attempt_ceiling: config.attempt_ceiling,
        }
    }

    /// Deterministic part of the curve: `min(base * factor^attempt, max)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(self.attempt_ceiling).min(i32::MAX as u32) as i32;
        let millis = self.base.as_millis() as f64 * self.factor.max(1.0).powi(exponent);
        let capped = millis.min(self.max.as_millis() as f64);
        if capped.is_finite() && capped > 0.0 {
            Duration::from_millis(capped.round() as u64)
        } else {
            Duration::ZERO
        }
    }

    /// Delay before attempt `attempt`, jittered and never above `max`.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.next_delay_with(attempt, &mut rand::thread_rng())
    }

    pub fn next_delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let delay = self.delay(attempt);
        let spread = delay.as_millis() as f64 * self.jitter.clamp(0.0, 1.0);
        let jitter = if spread >= 1.0 {
            Duration::from_millis(rng.gen_range(0..=spread as u64))
        } else {
            Duration::ZERO
        };
        (delay + jitter).min(self.max)
    }

    /// Advance a failure counter, saturating at the ceiling.
    pub fn next_attempt(&self, attempt: u32) -> u32 {
        attempt.saturating_add(1).min(self.attempt_ceiling.max(1))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}
