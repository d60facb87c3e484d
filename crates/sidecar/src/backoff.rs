//! Exponential reconnect backoff

use rand::Rng;
use std::time::Duration;

use voicehub_config::BackoffConfig;

/// Exponential backoff with a delay cap and bounded attempts.
/// Delays carry up to 25% jitter to avoid reconnect stampedes.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    initial: Duration,
    factor: f64,
    max_delay: Duration,
    max_attempts: u32,
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial,
            factor: 2.0,
            max_delay,
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the given 1-based attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial.as_millis() as f64;
        let exp = self.factor.powi(attempt.saturating_sub(1) as i32);
        let capped = (base * exp).min(self.max_delay.as_millis() as f64);

        let jitter = rand::thread_rng().gen_range(0.0..=capped * 0.25);
        Duration::from_millis((capped + jitter) as u64).min(self.max_delay)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(2), 5)
    }
}

impl From<BackoffConfig> for BackoffPolicy {
    fn from(config: BackoffConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_ms),
            Duration::from_millis(config.max_delay_ms),
            config.max_attempts,
        )
    }
}
