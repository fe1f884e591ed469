/// Bounded retry with exponential backoff and a wall-clock deadline.
///
/// One primitive replaces the per-call-site attempt loops: it takes an
/// operation, a policy, and returns a tagged result instead of throwing
/// past the boundary. The deadline caps total elapsed time, and each
/// attempt runs under a timeout for whatever budget remains, so a stuck
/// collaborator cannot stall the decision cycle indefinitely.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout, Instant};
use tracing::warn;

use crate::config::RetryConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub deadline: Duration,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            backoff_factor: config.backoff_factor,
            deadline: Duration::from_millis(config.deadline_ms),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("deadline exceeded after {attempts} attempts")]
    DeadlineExceeded { attempts: u32 },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::DeadlineExceeded { attempts } => *attempts,
        }
    }
}

/// Runs `op` until it succeeds, the attempt budget is spent, or the
/// deadline passes. Each attempt is awaited under the remaining deadline
/// budget, so an op that hangs mid-flight is cancelled rather than left
/// to stall the caller. Every failure is logged with its attempt number.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let started = Instant::now();
    let mut delay = policy.initial_delay;
    let mut attempt = 0;

    loop {
        attempt += 1;
        let remaining = policy.deadline.saturating_sub(started.elapsed());
        match timeout(remaining, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => {
                warn!(label, attempt, error = %e, "attempt failed");
                if attempt >= policy.max_attempts {
                    return Err(RetryError::Exhausted { attempts: attempt, last: e });
                }
                if started.elapsed() + delay > policy.deadline {
                    return Err(RetryError::DeadlineExceeded { attempts: attempt });
                }
                sleep(delay).await;
                delay = delay.mul_f64(policy.backoff_factor);
            }
            Err(_) => {
                warn!(label, attempt, "attempt cancelled at the deadline");
                return Err(RetryError::DeadlineExceeded { attempts: attempt });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            backoff_factor: 2.0,
            deadline: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&fast_policy(5), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient")
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_the_attempt_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&fast_policy(3), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("down") }
        })
        .await;

        match result {
            Err(RetryError::Exhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn deadline_stops_before_the_budget() {
        let policy = RetryPolicy {
            max_attempts: 100,
            initial_delay: Duration::from_millis(50),
            backoff_factor: 1.0,
            deadline: Duration::from_millis(10),
        };
        let result: Result<(), _> = retry_with_backoff(&policy, "test", || async { Err("down") }).await;

        match result {
            Err(RetryError::DeadlineExceeded { attempts }) => assert_eq!(attempts, 1),
            other => panic!("expected DeadlineExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn hung_attempt_is_cancelled_at_the_deadline() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            backoff_factor: 2.0,
            deadline: Duration::from_millis(50),
        };
        let started = std::time::Instant::now();
        // An op that never completes must not stall the caller past the
        // deadline.
        let result: Result<(), RetryError<&str>> =
            retry_with_backoff(&policy, "test", || std::future::pending()).await;

        match result {
            Err(RetryError::DeadlineExceeded { attempts }) => assert_eq!(attempts, 1),
            other => panic!("expected DeadlineExceeded, got {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn first_success_needs_no_retries() {
        let result: Result<u32, RetryError<&str>> =
            retry_with_backoff(&fast_policy(3), "test", || async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
