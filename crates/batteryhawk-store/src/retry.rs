//! Reconnect backoff for storage backends.
//!
//! Mirrors `batteryhawk-core`'s BLE connection retry policy (same defaults:
//! 1s initial delay, 2x multiplier, 60s cap, 3 attempts) but is kept
//! crate-local: `batteryhawk-store` has no reason to depend on
//! `batteryhawk-core`.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff configuration for reconnect attempts.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Delay to wait before the given zero-indexed retry attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let delay = if self.jitter {
            let jitter_fraction = rand::thread_rng().gen_range(0.9..1.1);
            capped * jitter_fraction
        } else {
            capped
        };
        Duration::from_secs_f64(delay.max(0.0))
    }
}
