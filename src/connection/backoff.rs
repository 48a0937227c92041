//! Exponential reconnect backoff with jitter.

use crate::config::ConnectionConfig;
use rand::Rng;
use std::time::Duration;

/// `delay = min(base * 2^attempt, max) +/- jitter`, never above `max`.
#[derive(Clone, Debug, PartialEq)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    jitter_ratio: f64,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter_ratio: f64) -> Self {
        let base_ms = (base.as_millis() as u64).max(1);
        Self {
            base_ms,
            max_ms: (max.as_millis() as u64).max(base_ms),
            jitter_ratio: jitter_ratio.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.jitter_ratio,
        )
    }

    /// Delay before the reconnect following `attempt` failed cycles.
    pub fn delay(&self, attempt: u32) -> Duration {
        let unit = if self.jitter_ratio > 0.0 {
            rand::thread_rng().gen_range(-1.0..=1.0)
        } else {
            0.0
        };
        self.delay_with(attempt, unit)
    }

    /// Deterministic form of [`delay`](Self::delay). `unit` in `[-1, 1]`
    /// picks where in the jitter window the delay lands.
    pub fn delay_with(&self, attempt: u32, unit: f64) -> Duration {
        let raw = self.raw_delay_ms(attempt);
        let jitter = raw as f64 * self.jitter_ratio * unit.clamp(-1.0, 1.0);
        let jittered = (raw as f64 + jitter).round().max(1.0) as u64;
        Duration::from_millis(jittered.min(self.max_ms))
    }

    /// Delay without jitter.
    pub fn raw_delay_ms(&self, attempt: u32) -> u64 {
        let factor = 2u64.saturating_pow(attempt);
        self.base_ms.saturating_mul(factor).min(self.max_ms)
    }
}
