//! Bounded retry with exponential backoff.
//!
//! Wraps a fallible async operation and re-runs it up to a configured number
//! of attempts, doubling the delay after each failure. No state is kept
//! across invocations.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Retry schedule for one class of operation.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first (not a "retry").
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled after each failure.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Backoff before the attempt after failed attempt `attempt` (1-based):
    /// `base_delay * 2^(attempt - 1)`.
    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Returned when every attempt failed; carries the last underlying error.
#[derive(Debug, Error)]
#[error("all {attempts} attempts failed: {source}")]
pub struct RetryExhausted<E: std::error::Error> {
    pub attempts: u32,
    #[source]
    pub source: E,
}

/// Run `operation` under `policy`, returning the first success or
/// [`RetryExhausted`] wrapping the final failure.
///
/// The operation must be idempotent; every non-terminal failure is logged at
/// warn level before the backoff sleep.
pub async fn retry<T, E, F, Fut>(policy: RetryPolicy, mut operation: F) -> Result<T, RetryExhausted<E>>
where
    E: std::error::Error,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt == max_attempts => {
                return Err(RetryExhausted {
                    attempts: max_attempts,
                    source: err,
                });
            }
            Err(err) => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    unreachable!("loop returns on the final attempt")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Error)]
    #[error("boom")]
    struct Boom;

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry(
            RetryPolicy::new(3, Duration::from_millis(100)),
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(Boom)
                    } else {
                        Ok(n)
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = retry(
            RetryPolicy::new(3, Duration::from_millis(10)),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(Boom) }
            },
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_success_skips_backoff() {
        let start = tokio::time::Instant::now();
        let result = retry(RetryPolicy::new(5, Duration::from_secs(10)), || async {
            Ok::<_, Boom>(42)
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::new(4, Duration::from_millis(250));
        assert_eq!(policy.backoff(1), Duration::from_millis(250));
        assert_eq!(policy.backoff(2), Duration::from_millis(500));
        assert_eq!(policy.backoff(3), Duration::from_millis(1000));
    }
}
