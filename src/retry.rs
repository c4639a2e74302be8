//! Exponential backoff for idempotent remote reads.
//!
//! Transaction submission never goes through here: a retried submission could
//! land twice.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio::time::sleep;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = single attempt).
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_retries: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_backoff,
            max_backoff,
            backoff_multiplier,
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    fn next_backoff(&self, current: Duration) -> Duration {
        Duration::from_secs_f64(
            (current.as_secs_f64() * self.backoff_multiplier).min(self.max_backoff.as_secs_f64()),
        )
    }

    /// Runs `operation` until it succeeds or the retry budget is spent.
    /// The last error is returned unchanged.
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = 0;
        let mut backoff = self.initial_backoff;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempts > 0 {
                        tracing::info!(
                            target: "hatchery::retry",
                            operation = operation_name,
                            attempts = attempts + 1,
                            "Operation succeeded after retrying"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => {
                    attempts += 1;
                    if attempts > self.max_retries {
                        tracing::error!(
                            target: "hatchery::retry",
                            operation = operation_name,
                            attempts,
                            error = ?err,
                            "Operation failed, giving up"
                        );
                        return Err(err);
                    }

                    tracing::warn!(
                        target: "hatchery::retry",
                        operation = operation_name,
                        attempt = attempts,
                        max_attempts = self.max_retries + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = ?err,
                        "Operation failed, retrying"
                    );

                    sleep(backoff).await;
                    backoff = self.next_backoff(backoff);
                }
            }
        }
    }
}
