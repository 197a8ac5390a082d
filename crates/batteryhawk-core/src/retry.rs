//! Generic retry logic for BLE operations, with exponential backoff and
//! jitter shared by the connection pool's reconnect machinery and
//! individual command retries.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Configuration for retry/backoff behavior.
///
/// The delay for attempt `n` (0-indexed) is
/// `initial_delay * backoff_multiplier^n`, capped at `max_delay`, with
/// optional jitter of ±`jitter_fraction` applied on top.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
    /// Fraction of the capped delay the jitter may add or subtract, e.g.
    /// `0.1` for ±10%.
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
            jitter_fraction: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Retry configuration for connection attempts: matches spec.md §4.1's
    /// `delay_n = base_delay * 2^n + jitter` with a 60s cap by default.
    pub fn for_connect(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            max_retries: max_attempts,
            initial_delay: base_delay,
            max_delay,
            backoff_multiplier: 2.0,
            jitter: true,
            jitter_fraction: 0.1,
        }
    }

    /// Retry configuration for protocol commands: fewer attempts, shorter
    /// delays, no long-tail backoff.
    pub fn for_command() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(3),
            backoff_multiplier: 2.0,
            jitter: true,
            jitter_fraction: 0.1,
        }
    }

    pub fn max_retries(mut self, value: u32) -> Self {
        self.max_retries = value;
        self
    }

    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Delay before the (0-indexed) `attempt`th retry.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay.as_secs_f64());

        let final_delay = if self.jitter {
            let jitter = (rand::rng().random::<f64>() * 2.0 - 1.0) * self.jitter_fraction;
            capped_delay * (1.0 + jitter)
        } else {
            capped_delay
        };

        Duration::from_secs_f64(final_delay.max(0.0))
    }
}

/// Execute an async operation with retry logic, sleeping between attempts
/// according to `config`. Stops early when the error is classified
/// permanent (see [`Error::is_transient`]).
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation_name: &str, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..=config.max_retries {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!("{} succeeded after {} retries", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(e) => {
                if !e.is_transient() {
                    return Err(e);
                }
                last_error = Some(e);

                if attempt < config.max_retries {
                    let delay = config.delay_for_attempt(attempt);
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}",
                        operation_name,
                        attempt + 1,
                        config.max_retries + 1,
                        delay
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::InvalidConfig("retry loop produced no error".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_grows_exponentially_without_jitter() {
        let config = RetryConfig {
            jitter: false,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            ..RetryConfig::none()
        };
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn delay_is_capped_at_max_delay() {
        let config = RetryConfig {
            jitter: false,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            ..RetryConfig::none()
        };
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_within_configured_fraction() {
        let config = RetryConfig {
            jitter: true,
            jitter_fraction: 0.1,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            ..RetryConfig::none()
        };
        for _ in 0..50 {
            let delay = config.delay_for_attempt(0).as_secs_f64();
            assert!((0.9..=1.1).contains(&delay), "delay {delay} out of bounds");
        }
    }

    #[tokio::test]
    async fn with_retry_succeeds_after_transient_failures() {
        let attempts = AtomicU32::new(0);
        let config = RetryConfig::none().max_retries(3).jitter(false);

        let result = with_retry(&config, "test_op", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::Kind(batteryhawk_types::Error::connection("flaky")))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn with_retry_stops_immediately_on_permanent_error() {
        let attempts = AtomicU32::new(0);
        let config = RetryConfig::none().max_retries(3).jitter(false);

        let result: Result<()> = with_retry(&config, "test_op", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Kind(batteryhawk_types::Error::state("bad state"))) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
