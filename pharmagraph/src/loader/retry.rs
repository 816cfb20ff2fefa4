//! Bounded exponential backoff for batch writes.

use backoff::{future::retry, ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::warn;

use crate::errors::StoreError;

/// Retry schedule: `base × 2^n` capped at `max_delay`, no jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (zero-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.base_delay)
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_interval(self.max_delay)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Result of a retried operation plus the number of attempts made.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, StoreError>,
    pub attempts: u32,
}

/// Run `op` until it succeeds, fails permanently, or has been tried
/// `max_retries + 1` times. Only [`StoreError::is_transient`] errors retry.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, operation: &str, mut op: F) -> Attempted<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let attempts = AtomicU32::new(0);
    let counter = &attempts;

    let result = retry(policy.schedule(), move || {
        let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
        let fut = op();
        async move {
            match fut.await {
                Ok(value) => Ok(value),
                Err(e) if e.is_transient() && attempt <= policy.max_retries => {
                    warn!(
                        operation,
                        attempt,
                        max_retries = policy.max_retries,
                        next_delay_ms = policy.delay_for(attempt - 1).as_millis() as u64,
                        error = %e,
                        "transient store error, retrying"
                    );
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        }
    })
    .await;

    Attempted {
        result,
        attempts: attempts.load(Ordering::SeqCst),
    }
}
