//! Bounded retry logic.
//!
//! # Responsibilities
//! - Execute a fallible async operation up to N times
//! - Sleep an exponential, jittered delay between attempts
//! - Surface the last error once the budget is spent
//!
//! # Design Decisions
//! - Retries are bounded; the caller decides what an exhausted budget means
//! - Jittered backoff prevents lockstep retries against a busy disk

use std::future::Future;
use std::time::Duration;

use crate::resilience::backoff::calculate_backoff;

/// Retry budget for a single operation.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    fn delay_after(&self, failed_attempt: u32) -> Duration {
        calculate_backoff(
            failed_attempt,
            self.base_delay.as_millis() as u64,
            self.max_delay.as_millis() as u64,
            0.3,
        )
    }
}

/// The operation failed on every attempt.
#[derive(Debug)]
pub struct RetriesExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Run `op` until it succeeds or the policy's attempts are spent.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, RetriesExhausted<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= policy.max_attempts => {
                tracing::error!(
                    operation,
                    attempts = attempt,
                    error = %e,
                    "All retries exhausted"
                );
                return Err(RetriesExhausted {
                    attempts: attempt,
                    last_error: e,
                });
            }
            Err(e) => {
                let delay = policy.delay_after(attempt - 1);
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
