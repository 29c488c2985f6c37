//! Exponential backoff with jitter
//!
//! [`Backoff`] drives the status watcher's unbounded reconnect loop.
//! [`retry_with_backoff`] wraps bounded retries of single API calls and gives
//! up immediately on errors that are not retryable.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::Result;

/// Backoff parameters
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = infinite)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for a single delay
    pub max_delay: Duration,
    /// Growth factor applied after every failure
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Short bounded retry for writes that lost an optimistic concurrency race
    pub fn conflict() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        }
    }
}

/// Stateful delay sequence: grows on every [`Backoff::next_delay`], capped at
/// `max_delay`, and starts over after [`Backoff::reset`].
#[derive(Clone, Debug)]
pub struct Backoff {
    config: RetryConfig,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        let current = config.initial_delay;
        Self {
            config,
            current,
            attempts: 0,
        }
    }

    /// Failures since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Next delay with 0.5x-1.5x jitter applied
    pub fn next_delay(&mut self) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        let base = self.current;
        self.current = Duration::from_secs_f64(
            (self.current.as_secs_f64() * self.config.backoff_multiplier)
                .min(self.config.max_delay.as_secs_f64()),
        );
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        Duration::from_secs_f64(base.as_secs_f64() * jitter).min(self.config.max_delay)
    }

    pub fn reset(&mut self) {
        self.current = self.config.initial_delay;
        self.attempts = 0;
    }
}

/// Run `operation` until it succeeds, it fails with a non-retryable error, or
/// `max_attempts` is exhausted. The last error is returned unchanged.
pub async fn retry_with_backoff<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = Backoff::new(config.clone());

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() => {
                debug!(operation = %operation_name, error = %e, "Operation failed permanently");
                return Err(e);
            }
            Err(e) => {
                let attempt = backoff.attempts() + 1;
                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    warn!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                let delay = backoff.next_delay();
                debug!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
