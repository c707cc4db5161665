//! Bounded retry with exponential backoff.
//!
//! Only container restart and container creation are retried. Everything
//! else fails fast into a structured result.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};
use warden_core::Result;

/// Attempt limit and backoff shape for one kind of call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    /// Policy for container restarts: 3 attempts from 2s.
    pub const RESTART: Self = Self::new(3, 2_000, 30_000);

    /// Policy for container creation: 3 attempts from 3s.
    pub const CREATE: Self = Self::new(3, 3_000, 30_000);

    /// Create a policy.
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// A policy that retries without sleeping.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, 0, 0)
    }

    /// Same backoff with a different attempt limit (at least one).
    #[must_use]
    pub fn with_max_attempts(self, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..self
        }
    }

    /// Delay before retry number `attempt` (0-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_delay_ms, self.max_delay_ms)
    }
}

/// `base * 2^attempt`, capped at `max_ms`.
#[must_use]
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let backoff = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(backoff.min(max_ms))
}

/// Final value of a retried call and how many attempts it took.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub value: Result<T>,
    pub attempts: u32,
}

/// Run `call` until it succeeds or `policy.max_attempts` is reached.
///
/// Precondition and not-found errors are returned immediately: repeating
/// the call cannot change their outcome.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, operation: &str, mut call: F) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt = attempt.saturating_add(1);
        match call().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Call succeeded after retry");
                }
                return RetryOutcome {
                    value: Ok(value),
                    attempts: attempt,
                };
            }
            Err(e) if e.is_precondition() || e.is_not_found() || attempt >= max_attempts => {
                warn!(operation, attempt, error = %e, "Giving up");
                return RetryOutcome {
                    value: Err(e),
                    attempts: attempt,
                };
            }
            Err(e) => {
                let delay = policy.delay_for(attempt.saturating_sub(1));
                warn!(
                    operation,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "Call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::atomic::{AtomicU32, Ordering};

    use warden_core::Error;

    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(calculate_backoff(0, 2_000, 30_000), Duration::from_millis(2_000));
        assert_eq!(calculate_backoff(1, 2_000, 30_000), Duration::from_millis(4_000));
        assert_eq!(calculate_backoff(2, 2_000, 30_000), Duration::from_millis(8_000));
        assert_eq!(calculate_backoff(10, 2_000, 30_000), Duration::from_millis(30_000));
        assert_eq!(calculate_backoff(u32::MAX, 2_000, 30_000), Duration::from_millis(30_000));
    }

    #[test]
    fn test_with_max_attempts_never_zero() {
        assert_eq!(RetryPolicy::RESTART.with_max_attempts(0).max_attempts, 1);
        assert_eq!(RetryPolicy::CREATE.with_max_attempts(5).max_attempts, 5);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);

        let outcome = with_retry(RetryPolicy::immediate(3), "restart", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::runtime("restart", "timeout"))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(outcome.value.unwrap(), 7);
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn test_stops_at_max_attempts() {
        let calls = AtomicU32::new(0);

        let outcome: RetryOutcome<()> = with_retry(RetryPolicy::immediate(3), "create", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::runtime("create", "daemon unavailable"))
        })
        .await;

        assert!(outcome.value.is_err());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let calls = AtomicU32::new(0);

        let outcome: RetryOutcome<()> = with_retry(RetryPolicy::immediate(3), "restart", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::container_not_found("c1"))
        })
        .await;

        assert!(outcome.value.is_err());
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_between_attempts() {
        let started = tokio::time::Instant::now();

        let outcome: RetryOutcome<()> =
            with_retry(RetryPolicy::new(3, 100, 1_000), "restart", || async {
                Err(Error::runtime("restart", "timeout"))
            })
            .await;

        assert_eq!(outcome.attempts, 3);
        assert!(started.elapsed() >= Duration::from_millis(300));
    }
}
