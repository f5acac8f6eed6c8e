//! Bounded retry with a fixed interval.
//!
//! Writes that must land before a reconcile can report success (status
//! updates, content creation) are attempted up to `attempts` times with a
//! `tokio::time::sleep` of `interval` between attempts. Only the worker
//! handling the key waits.

use std::fmt::Display;
use std::future::Future;

use tracing::debug;

use crate::config::RetryPolicy;

/// Outcome of a retried operation.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    /// The successful value or the last error.
    pub result: Result<T, E>,
    /// Number of attempts made.
    pub attempts: u32,
}

/// Run `operation` until it succeeds or the policy's attempts are used up.
///
/// `operation` receives the 1-based attempt number. A policy with zero
/// attempts still runs the operation once.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut operation: F,
) -> RetryOutcome<T, E>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(what, attempt, "succeeded after retry");
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(e) if attempt < attempts => {
                debug!(what, attempt, error = %e, "attempt failed, retrying");
                if !policy.interval.is_zero() {
                    tokio::time::sleep(policy.interval).await;
                }
                attempt += 1;
            }
            Err(e) => {
                debug!(what, attempt, error = %e, "giving up");
                return RetryOutcome {
                    result: Err(e),
                    attempts: attempt,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_first_attempt_success() {
        let outcome = with_retry(&RetryPolicy::default(), "noop", |_| async {
            Ok::<_, String>(42)
        })
        .await;
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.result, Ok(42));
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let outcome = with_retry(&policy, "flaky", |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(format!("failure {n}"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.result, Ok(2));
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let outcome = with_retry(&policy, "broken", |attempt| async move {
            Err::<(), _>(format!("attempt {attempt}"))
        })
        .await;

        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.result, Err("attempt 3".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_between_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_secs(10));
        let start = tokio::time::Instant::now();
        let outcome = with_retry(&policy, "slow", |_| async { Err::<(), _>("nope") }).await;

        assert_eq!(outcome.attempts, 3);
        assert!(start.elapsed() >= Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_zero_attempts_runs_once() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(0, Duration::ZERO);
        let _ = with_retry(&policy, "once", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>("no") }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
