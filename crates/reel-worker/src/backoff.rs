//! Backoff executor for flaky collaborators.
//!
//! Retries transient failures indefinitely by default, doubling the delay
//! each attempt up to a cap. The loop is an explicit state machine driven
//! through the injectable clock, and every retry is reported to an observer
//! so the current stage record can expose attempt count and next-retry
//! time to polling clients. An optional wall-clock ceiling converts an
//! endless retry into a terminal error.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::warn;

use crate::clock::Clock;
use crate::error::{WorkerError, WorkerResult};

/// Backoff tuning.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the second attempt; doubles from there.
    pub base_delay: Duration,
    /// Cap on the delay between attempts.
    pub max_delay: Duration,
    /// Overall wall-clock budget. `None` retries forever.
    pub ceiling: Option<Duration>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(300),
            ceiling: None,
        }
    }
}

impl BackoffPolicy {
    /// Delay after the given (1-based) failed attempt.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(2u32.saturating_pow(doublings));
        delay.min(self.max_delay)
    }
}

/// Retry progress snapshot handed to observers.
#[derive(Debug, Clone)]
pub struct RetryAttempt {
    /// 1-based count of failed attempts so far
    pub attempt: u32,
    /// Error from the last attempt
    pub last_error: String,
    /// When the next attempt will start
    pub next_retry_at: DateTime<Utc>,
}

/// Receives a notification before each retry sleep.
#[async_trait]
pub trait RetryObserver: Send + Sync {
    async fn on_retry(&self, attempt: &RetryAttempt);
}

/// Observer that does nothing.
pub struct NoopObserver;

#[async_trait]
impl RetryObserver for NoopObserver {
    async fn on_retry(&self, _attempt: &RetryAttempt) {}
}

/// Executor wrapping calls to transiently-unavailable services.
pub struct BackoffExecutor {
    policy: BackoffPolicy,
    clock: Arc<dyn Clock>,
}

impl BackoffExecutor {
    pub fn new(policy: BackoffPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { policy, clock }
    }

    /// Run `op`, retrying transient failures per the policy.
    ///
    /// Non-transient errors bail out immediately. When the ceiling is
    /// configured and exceeded, the last transient error is surfaced as a
    /// terminal microservice failure carrying the attempt count.
    pub async fn execute<F, Fut, T>(
        &self,
        operation: &str,
        observer: &dyn RetryObserver,
        op: F,
    ) -> WorkerResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = WorkerResult<T>>,
    {
        let started = self.clock.now();
        let mut attempt = 0u32;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    attempt += 1;
                    let now = self.clock.now();

                    if let Some(ceiling) = self.policy.ceiling {
                        let elapsed = (now - started).to_std().unwrap_or_default();
                        if elapsed >= ceiling {
                            return Err(WorkerError::microservice(format!(
                                "{operation} still failing after {attempt} attempts over {}s: {e}",
                                elapsed.as_secs()
                            )));
                        }
                    }

                    let delay = self.policy.delay_for_attempt(attempt);
                    let snapshot = RetryAttempt {
                        attempt,
                        last_error: e.to_string(),
                        next_retry_at: now
                            + chrono::Duration::from_std(delay).unwrap_or_default(),
                    };
                    observer.on_retry(&snapshot).await;

                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Transient failure, backing off: {}", e
                    );
                    self.clock.sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[test]
    fn test_delay_doubles_up_to_cap() {
        let policy = BackoffPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            ceiling: None,
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(9), Duration::from_secs(256));
        // Capped at five minutes
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(300));
        assert_eq!(policy.delay_for_attempt(30), Duration::from_secs(300));
    }

    struct RecordingObserver {
        attempts: Mutex<Vec<RetryAttempt>>,
    }

    #[async_trait]
    impl RetryObserver for RecordingObserver {
        async fn on_retry(&self, attempt: &RetryAttempt) {
            self.attempts.lock().unwrap().push(attempt.clone());
        }
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let clock = Arc::new(ManualClock::new());
        let executor = BackoffExecutor::new(
            BackoffPolicy {
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(5),
                ceiling: None,
            },
            clock.clone(),
        );
        let observer = RecordingObserver {
            attempts: Mutex::new(Vec::new()),
        };

        let calls = AtomicU32::new(0);
        let result = executor
            .execute("transcribe", &observer, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Err(WorkerError::microservice("unavailable"))
                    } else {
                        Ok(42u32)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(
            clock.sleeps(),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
            ]
        );

        let seen = observer.attempts.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].attempt, 1);
        assert_eq!(seen[2].attempt, 3);
        assert!(seen[0].last_error.contains("unavailable"));
    }

    #[tokio::test]
    async fn test_fatal_error_bails_immediately() {
        let clock = Arc::new(ManualClock::new());
        let executor = BackoffExecutor::new(BackoffPolicy::default(), clock.clone());

        let result: WorkerResult<()> = executor
            .execute("transcribe", &NoopObserver, || async {
                Err(WorkerError::validation("bad audio path"))
            })
            .await;

        assert!(matches!(result, Err(WorkerError::Validation(_))));
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_ceiling_turns_retry_into_terminal_failure() {
        let clock = Arc::new(ManualClock::new());
        let executor = BackoffExecutor::new(
            BackoffPolicy {
                base_delay: Duration::from_secs(10),
                max_delay: Duration::from_secs(10),
                ceiling: Some(Duration::from_secs(25)),
            },
            clock.clone(),
        );

        let result: WorkerResult<()> = executor
            .execute("transcribe", &NoopObserver, || async {
                Err(WorkerError::microservice("still down"))
            })
            .await;

        match result {
            Err(WorkerError::Microservice(msg)) => {
                assert!(msg.contains("still failing"));
            }
            other => panic!("expected ceiling failure, got {other:?}"),
        }
        // Failures at t=0/10/20 each sleep; the failure at t=30 trips the
        // 25s ceiling instead.
        assert_eq!(clock.sleeps().len(), 3);
    }
}
