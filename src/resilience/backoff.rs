//! Reconnect backoff with optional growth and jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::UpstreamConfig;

/// Delay policy between upstream reconnect attempts.
///
/// With the default `factor` of 1.0 every retry waits `base`; larger factors
/// grow the delay geometrically up to `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub factor: f64,
    pub jitter_ratio: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            factor: 1.0,
            jitter_ratio: 0.0,
        }
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &UpstreamConfig) -> Self {
        Self {
            base: Duration::from_millis(config.backoff_base_ms),
            max: Duration::from_millis(config.backoff_max_ms),
            factor: config.backoff_factor,
            jitter_ratio: config.jitter_ratio,
        }
    }

    /// Delay before retry number `attempt` (1-based). Never less than `base`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as f64;
        let max_ms = (self.max.as_millis() as f64).max(base_ms);
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let delay_ms = (base_ms * self.factor.max(1.0).powi(exponent)).min(max_ms);

        // Apply jitter (0 to jitter_ratio of the delay)
        let jitter_range = delay_ms * self.jitter_ratio.clamp(0.0, 1.0);
        let jitter = if jitter_range >= 1.0 {
            rand::thread_rng().gen_range(0.0..jitter_range)
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter) as u64)
    }
}
