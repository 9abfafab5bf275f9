//! Circuit breaker guarding fragile external dependencies.
//!
//! Each protected dependency (outbound email, SSL lookups) gets its own
//! breaker instance. After a streak of consecutive failures the breaker
//! opens and fast-fails callers until a cool-down elapses; the first call
//! after the cool-down is let through as a recovery probe.

use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation, every call is attempted.
    Closed,
    /// Fast-fail, calls are rejected without attempting the operation.
    Open,
    /// Cool-down elapsed; exactly the next call probes for recovery.
    HalfOpen,
}

/// Per-dependency breaker tuning.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures required to open the breaker.
    pub failure_threshold: u32,
    /// How long the breaker stays open before probing again.
    pub cool_down: Duration,
}

/// Error returned by [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum BreakerError<E: std::error::Error> {
    /// The call was rejected without invoking the operation.
    #[error("circuit breaker is open")]
    Open,
    /// The operation itself failed; the failure counted against the breaker.
    #[error(transparent)]
    Service(E),
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    opened_at: Option<Instant>,
}

/// Failure-streak circuit breaker. A single success erases accumulated
/// failures; this tracks streaks, not a failure rate over time.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: &'static str,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: BreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                opened_at: None,
            }),
        }
    }

    /// Current state, re-evaluating the cool-down lazily.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock().unwrap();
        self.refresh(&mut inner);
        inner.state
    }

    /// Run `operation` through the breaker.
    ///
    /// Rejects with [`BreakerError::Open`] while gating; otherwise
    /// propagates the operation's own result and updates breaker state.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        E: std::error::Error,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        {
            let mut inner = self.inner.lock().unwrap();
            self.refresh(&mut inner);
            if inner.state == BreakerState::Open {
                return Err(BreakerError::Open);
            }
        }

        match operation().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(BreakerError::Service(err))
            }
        }
    }

    /// OPEN -> HALF_OPEN once the cool-down has elapsed. Evaluated on call,
    /// not by a background timer.
    fn refresh(&self, inner: &mut BreakerInner) {
        if inner.state == BreakerState::Open {
            let elapsed = inner
                .opened_at
                .map(|t| t.elapsed())
                .unwrap_or(Duration::ZERO);
            if elapsed >= self.config.cool_down {
                tracing::info!(breaker = self.name, "cool-down elapsed, probing");
                inner.state = BreakerState::HalfOpen;
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.failure_count = 0;
        inner.state = BreakerState::Closed;
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.failure_count += 1;
        if inner.failure_count >= self.config.failure_threshold {
            if inner.state != BreakerState::Open {
                tracing::warn!(
                    breaker = self.name,
                    failures = inner.failure_count,
                    "circuit breaker opened"
                );
            }
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("down")]
    struct Down;

    fn breaker(threshold: u32, cool_down: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            BreakerConfig {
                failure_threshold: threshold,
                cool_down,
            },
        )
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_rejects() {
        let cb = breaker(3, Duration::from_secs(60));

        for _ in 0..3 {
            let r: Result<(), _> = cb.execute(|| async { Err(Down) }).await;
            assert!(matches!(r, Err(BreakerError::Service(_))));
        }
        assert_eq!(cb.state(), BreakerState::Open);

        // The wrapped operation must not be invoked while open.
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let r = cb
            .execute(|| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, Down>(()) }
            })
            .await;
        assert!(matches!(r, Err(BreakerError::Open)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_success_closes() {
        let cb = breaker(2, Duration::from_secs(30));

        for _ in 0..2 {
            let _: Result<(), _> = cb.execute(|| async { Err(Down) }).await;
        }
        assert_eq!(cb.state(), BreakerState::Open);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cb.state(), BreakerState::HalfOpen);

        let r = cb.execute(|| async { Ok::<_, Down>(7) }).await;
        assert_eq!(r.unwrap(), 7);
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.inner.lock().unwrap().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(2, Duration::from_secs(30));

        for _ in 0..2 {
            let _: Result<(), _> = cb.execute(|| async { Err(Down) }).await;
        }
        tokio::time::advance(Duration::from_secs(31)).await;

        let r: Result<(), _> = cb.execute(|| async { Err(Down) }).await;
        assert!(matches!(r, Err(BreakerError::Service(_))));
        assert_eq!(cb.state(), BreakerState::Open);

        // Re-open resets the cool-down clock.
        tokio::time::advance(Duration::from_secs(15)).await;
        assert_eq!(cb.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let cb = breaker(3, Duration::from_secs(60));

        for _ in 0..2 {
            let _: Result<(), _> = cb.execute(|| async { Err(Down) }).await;
        }
        let _ = cb.execute(|| async { Ok::<_, Down>(()) }).await;
        assert_eq!(cb.inner.lock().unwrap().failure_count, 0);

        // Two more failures stay below the threshold after the reset.
        for _ in 0..2 {
            let _: Result<(), _> = cb.execute(|| async { Err(Down) }).await;
        }
        assert_eq!(cb.state(), BreakerState::Closed);
    }
}
