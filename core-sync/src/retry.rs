//! Bounded retry with exponential backoff for remote DAM calls.
//!
//! Every call runs under `call_timeout`; an elapsed timeout counts as a
//! transient failure. Only retryable errors are repeated, and the attempt
//! budget of a task is shared by all of its steps.

use std::future::Future;
use std::time::Duration;

use core_runtime::IngestConfig;
use tracing::{debug, warn};

use crate::{Result, SyncError};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub max_backoff: Duration,
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: core_runtime::config::DEFAULT_MAX_ATTEMPTS,
            backoff_base: Duration::from_secs_f64(
                core_runtime::config::DEFAULT_BACKOFF_BASE_SECONDS,
            ),
            max_backoff: Duration::from_secs_f64(core_runtime::config::DEFAULT_MAX_BACKOFF_SECONDS),
            call_timeout: Duration::from_secs_f64(
                core_runtime::config::DEFAULT_CALL_TIMEOUT_SECONDS,
            ),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: config.backoff_base(),
            max_backoff: config.max_backoff(),
            call_timeout: config.call_timeout(),
        }
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`, capped
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        let factor = 2u32.pow(exponent);
        self.backoff_base
            .checked_mul(factor)
            .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }

    /// Run one remote step against a shared attempt budget.
    ///
    /// `attempts` is the budget counter of the caller: the first remote call
    /// of a task makes it 1 and every retry adds one. It is never reset
    /// between steps, so retries spent in one step are unavailable to the
    /// next and a task makes at most `max_attempts` attempts overall.
    ///
    /// # Errors
    ///
    /// The first non-retryable error, or the last retryable one once
    /// `attempts` has reached `max_attempts`.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        attempts: &mut u32,
        mut call: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bridge_traits::error::Result<T>>,
    {
        if *attempts == 0 {
            *attempts = 1;
        }
        let mut retried = false;

        loop {
            let error = match tokio::time::timeout(self.call_timeout, call()).await {
                Ok(Ok(value)) => {
                    if retried {
                        debug!(operation, attempt = *attempts, "Remote call succeeded after retry");
                    }
                    return Ok(value);
                }
                Ok(Err(e)) => SyncError::from(e),
                Err(_) => SyncError::Timeout {
                    operation: operation.to_string(),
                    timeout_ms: self.call_timeout.as_millis() as u64,
                },
            };

            if !error.is_retryable() {
                warn!(operation, attempt = *attempts, error = %error, "Remote call failed permanently");
                return Err(error);
            }

            if *attempts >= self.max_attempts {
                warn!(
                    operation,
                    attempt = *attempts,
                    error = %error,
                    "Remote call failed after {} attempts",
                    self.max_attempts
                );
                return Err(error);
            }

            let delay = self.delay_for(*attempts);
            warn!(
                operation,
                attempt = *attempts,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Remote call failed, retrying"
            );
            tokio::time::sleep(delay).await;
            *attempts += 1;
            retried = true;
        }
    }
}
