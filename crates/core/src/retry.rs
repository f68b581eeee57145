//! Retry policy for delivery-style executors

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounded exponential backoff.
///
/// Total attempts are `max_retries + 1`. The delay before retry `n` (1-based)
/// is `delay_ms * 2^(n-1)`, so with the defaults a permanently failing target
/// is tried four times with 1s, 2s and 4s between attempts.
///
/// # Example
///
/// ```
/// use stepwise_core::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(3, 1000);
/// assert_eq!(policy.total_attempts(), 4);
/// assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4000));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_delay_ms() -> u64 {
    1000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            delay_ms: default_delay_ms(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay_ms: u64) -> Self {
        Self {
            max_retries,
            delay_ms,
        }
    }

    /// Create a policy that never retries
    pub fn no_retry() -> Self {
        Self::new(0, 0)
    }

    /// Number of attempts including the first one
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay after failed attempt `attempt` (1-based) before the next one
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        Duration::from_millis(self.delay_ms.saturating_mul(factor))
    }

    /// Whether another attempt is allowed after `attempt` attempts have run
    pub fn has_attempts_remaining(&self, attempt: u32) -> bool {
        attempt < self.total_attempts()
    }

    /// Run `operation` until it succeeds or the attempt budget is spent.
    ///
    /// Attempts are strictly sequential. The closure receives the 1-based
    /// attempt number. The last error is returned when every attempt fails.
    pub async fn run<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if self.has_attempts_remaining(attempt) => {
                    let delay = self.delay_for_attempt(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.total_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        error = %e,
                        "All attempts failed"
                    );
                    return Err(e);
                }
            }
        }
    }
}
