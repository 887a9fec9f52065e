//! Exponential reconnect backoff.

use std::time::Duration;

use rand::RngExt;

/// Reconnect/backoff parameters for one session.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first reconnect attempt.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub factor: f64,
    /// Random jitter factor (0.0–1.0).
    pub jitter: f64,
}

impl BackoffConfig {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.base_delay.is_zero() {
            return Err("Retry base delay must be > 0".to_string());
        }
        if self.max_delay.is_zero() {
            return Err("Max retry delay must be > 0".to_string());
        }
        if self.factor < 1.0 || !self.factor.is_finite() {
            return Err("Backoff factor must be >= 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter) || !self.jitter.is_finite() {
            return Err("Jitter must be between 0.0 and 1.0".to_string());
        }
        Ok(())
    }
}

/// Delay to wait before reconnect attempt number `attempt` (zero-based).
///
/// Computes `min(base * factor^attempt, max)` in whole milliseconds, then
/// blends in jitter when configured.
pub fn calculate_backoff(config: BackoffConfig, attempt: u32) -> Duration {
    let base_ms = config.base_delay.as_millis() as f64;
    let max_ms = config.max_delay.as_millis() as f64;
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let capped = (base_ms * config.factor.powi(exponent)).min(max_ms);

    if config.jitter == 0.0 {
        return Duration::from_millis(capped.round() as u64);
    }

    let mut rng = rand::rng();
    let randomized = rng.random_range(0.0..=capped);
    let blended = capped * (1.0 - config.jitter) + randomized * config.jitter;
    Duration::from_millis(blended.round() as u64)
}
