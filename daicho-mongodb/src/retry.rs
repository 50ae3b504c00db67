//! Retry with exponential backoff for connection establishment.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// How connect attempts are retried: `max_retries` retries after the first
/// failure, sleeping `base_delay * 2^attempt` between attempts.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

/// A retry sequence that ran out of attempts.
#[derive(Debug)]
pub(crate) struct RetryExhausted<E> {
    /// Total attempts performed, retries included.
    pub attempts: u32,
    /// The failure of the final attempt.
    pub last_error: E,
}

impl RetryPolicy {
    /// Backoff before retrying after the attempt with the given zero-based
    /// index. Saturates instead of overflowing for absurd attempt counts.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Runs `op` until it succeeds or the attempt budget is spent.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, RetryExhausted<E>>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.max_retries + 1;
        for attempt in 0..attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 < attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        what,
                        attempt = attempt + 1,
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    return Err(RetryExhausted {
                        attempts,
                        last_error: err,
                    });
                }
            }
        }
        unreachable!("attempt budget is at least one")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = policy();
        assert_eq!(policy.delay_for(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4000));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_without_retrying() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, RetryExhausted<&str>> = policy()
            .run("connect", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(7) }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let result = policy()
            .run("connect", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n < 2 { Err("refused") } else { Ok(()) } }
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Two backoffs: 1s then 2s.
        assert_eq!(start.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_attempts_and_last_error() {
        let calls = AtomicU32::new(0);
        let err = policy()
            .run("connect", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>("refused") }
            })
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 4);
        assert_eq!(err.last_error, "refused");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
