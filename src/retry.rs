//! Bounded-timeout retry with exponential backoff.
//!
//! Only errors that report themselves as transient are retried; every
//! other error is returned after the first attempt.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    /// Delay before the first retry, doubled on each following one.
    pub base_delay_ms: u64,
    /// Upper bound for a single attempt.
    pub timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 200,
            timeout_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_mul(2u64.saturating_pow(attempt)))
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

pub trait Retryable: std::error::Error {
    fn is_transient(&self) -> bool;

    /// The error an attempt turns into when it exceeds the policy timeout.
    fn timed_out(context: &str) -> Self;
}

/// Final error of a retried operation, with the number of attempts made.
#[derive(Debug)]
pub struct Attempted<E> {
    pub error: E,
    pub attempts: u32,
}

pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    context: &str,
    f: F,
) -> Result<T, Attempted<E>>
where
    E: Retryable,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;

    loop {
        let result = match tokio::time::timeout(policy.timeout(), f()).await {
            Ok(result) => result,
            Err(_) => Err(E::timed_out(context)),
        };

        let error = match result {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        attempt += 1;
        if !error.is_transient() || attempt > policy.max_retries {
            return Err(Attempted {
                error,
                attempts: attempt,
            });
        }

        let delay = policy.delay(attempt - 1);
        tracing::warn!(
            attempt,
            max_retries = policy.max_retries,
            context,
            "transient failure, retrying in {delay:?}: {error}"
        );
        tokio::time::sleep(delay).await;
    }
}
