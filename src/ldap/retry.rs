//! Bounded retry of directory operations.

use std::future::Future;
use std::time::Duration;

use crate::config::LdapInstanceConfig;
use crate::error::Result;

pub const DEFAULT_RETRIES: u32 = 2;
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 200;
pub const DEFAULT_MAX_DELAY_MS: u64 = 5000;
const BACKOFF_MULTIPLIER: f64 = 2.0;
const MAX_BACKOFF_EXPONENT: u32 = 32;

/// Retry behavior for one directory operation.
///
/// An operation is attempted at most `max_retries + 1` times.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_RETRIES,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            backoff_multiplier: BACKOFF_MULTIPLIER,
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &LdapInstanceConfig) -> Self {
        Self {
            max_retries: config
                .retry_wrapper_default_retries
                .unwrap_or(DEFAULT_RETRIES),
            initial_delay: Duration::from_millis(
                config
                    .retry_initial_delay_ms
                    .unwrap_or(DEFAULT_INITIAL_DELAY_MS),
            ),
            backoff_multiplier: BACKOFF_MULTIPLIER,
            max_delay: Duration::from_millis(
                config.retry_max_delay_ms.unwrap_or(DEFAULT_MAX_DELAY_MS),
            ),
        }
    }

    /// Policy without any wait between attempts.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::ZERO,
            backoff_multiplier: BACKOFF_MULTIPLIER,
            max_delay: Duration::ZERO,
        }
    }

    /// Wait after the failed attempt number `attempt` (zero based).
    ///
    /// Never exceeds `max_delay`, whatever the attempt number.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(MAX_BACKOFF_EXPONENT) as i32;
        let factor = self.backoff_multiplier.powi(exponent);
        let delay = self.initial_delay.as_secs_f64() * factor;
        Duration::try_from_secs_f64(delay)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Run `op` until it succeeds or the budget is spent.
    ///
    /// The error of the last attempt is returned.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: &'static str,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => {
                    metrics::counter!(
                        "ldap_operations_total",
                        "operation" => operation,
                        "status" => "success"
                    )
                    .increment(1);
                    return Ok(value);
                },
                Err(err) => {
                    metrics::counter!(
                        "ldap_operation_failed_attempts_total",
                        "operation" => operation
                    )
                    .increment(1);
                    tracing::warn!(
                        operation,
                        error = %err,
                        kind = err.kind(),
                        "Attempt {} failed",
                        attempt + 1
                    );

                    if attempt >= self.max_retries {
                        metrics::counter!(
                            "ldap_operations_total",
                            "operation" => operation,
                            "status" => "failure"
                        )
                        .increment(1);
                        return Err(err);
                    }

                    let delay = self.delay_for(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                },
            }
        }
    }
}
