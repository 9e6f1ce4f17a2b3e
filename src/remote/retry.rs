//! Bounded retry with pluggable sleeping.
//!
//! Every call gets its own attempt loop; nothing is shared between calls.

use std::fmt::Display;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

/// How the wait grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    /// Same delay before every retry
    Fixed,
    /// `delay * attempt` before retry number `attempt`
    Linear,
}

/// Retry policy for one remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: BackoffKind,
}

impl RetryPolicy {
    /// Single-record fetches: 3 attempts, 2s apart.
    pub fn generic_fetch() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
            backoff: BackoffKind::Fixed,
        }
    }

    /// Paginated bulk fetches: 5 attempts, 5s apart.
    pub fn bulk_fetch() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(5),
            backoff: BackoffKind::Fixed,
        }
    }

    /// One attempt, no waiting.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
            backoff: BackoffKind::Fixed,
        }
    }

    /// Wait before the retry that follows failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            BackoffKind::Fixed => self.delay,
            BackoffKind::Linear => self.delay.saturating_mul(attempt),
        }
    }

    /// Upper bound on the total time spent sleeping.
    pub fn max_total_delay(&self) -> Duration {
        (1..self.max_attempts).map(|attempt| self.delay_for(attempt)).sum()
    }
}

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Abstraction over waiting so tests can run without real sleeps.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Sleeper that returns immediately and remembers what it was asked to wait.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    waits: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waits(&self) -> Vec<Duration> {
        self.waits
            .lock()
            .map(|waits| waits.clone())
            .unwrap_or_default()
    }

    pub fn total(&self) -> Duration {
        self.waits().into_iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut waits) = self.waits.lock() {
            waits.push(duration);
        }
    }
}

/// Run `op` until it succeeds, fails terminally, or the policy is exhausted.
///
/// `op` receives the 1-based attempt number. The last error is returned when
/// attempts run out.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    operation: &str,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(operation, attempt, "Remote call succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !err.is_retryable() || attempt >= max_attempts => {
                if err.is_retryable() {
                    tracing::warn!(
                        operation,
                        attempts = attempt,
                        error = %err,
                        "Remote call failed; retries exhausted"
                    );
                }
                return Err(err);
            }
            Err(err) => {
                let wait = policy.delay_for(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts,
                    wait_ms = wait.as_millis() as u64,
                    error = %err,
                    "Remote call failed; retrying"
                );
                metrics::counter!("catalog_sync_remote_retries_total", "operation" => operation.to_string())
                    .increment(1);
                sleeper.sleep(wait).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Flaky {
        retryable: bool,
    }

    impl Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky(retryable={})", self.retryable)
        }
    }

    impl Retryable for Flaky {
        fn is_retryable(&self) -> bool {
            self.retryable
        }
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt_within_bound() {
        let sleeper = RecordingSleeper::new();
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::generic_fetch();

        let result: Result<&str, Flaky> = with_retry(&policy, &sleeper, "test", |_| async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Flaky { retryable: true })
            } else {
                Ok("ok")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(sleeper.waits(), vec![Duration::from_secs(2); 2]);
        assert!(sleeper.total() <= policy.max_total_delay());
    }

    #[tokio::test]
    async fn terminal_errors_are_not_retried() {
        let sleeper = RecordingSleeper::new();
        let calls = AtomicU32::new(0);

        let result: Result<(), Flaky> =
            with_retry(&RetryPolicy::bulk_fetch(), &sleeper, "test", |_| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Flaky { retryable: false })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.waits().is_empty());
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let sleeper = RecordingSleeper::new();
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::bulk_fetch();

        let result: Result<(), Flaky> = with_retry(&policy, &sleeper, "test", |_| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Flaky { retryable: true })
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(sleeper.total(), Duration::from_secs(20));
    }

    #[test]
    fn linear_backoff_grows_with_attempt() {
        let policy = RetryPolicy {
            max_attempts: 4,
            delay: Duration::from_secs(1),
            backoff: BackoffKind::Linear,
        };
        assert_eq!(policy.delay_for(3), Duration::from_secs(3));
        assert_eq!(policy.max_total_delay(), Duration::from_secs(6));
    }
}
