//! # Retry Executor
//!
//! Runs a fallible async operation with exponential backoff.
//!
//! The executor never panics and never propagates: every run ends in a
//! [`RetryOutcome`]. Errors the caller classifies as non-retryable end the run
//! immediately. Cancellation is not an outcome: dropping the future stops it,
//! and [`RetryExecutor::execute_cancellable`] returns `None` once its token
//! fires.

use crate::config::RetryPolicy;
use core_async::sync::CancellationToken;
use core_async::time::{sleep, Duration};
use std::convert::Infallible;
use std::fmt::Display;
use std::future::Future;
use tracing::{debug, warn};

/// Details handed to the retry observer before each backoff wait.
#[derive(Debug)]
pub struct RetryAttempt<'a, E> {
    /// The attempt that just failed (1-based)
    pub attempt: u32,
    pub max_attempts: u32,
    /// How long the executor will wait before the next attempt
    pub next_delay: Duration,
    pub error: &'a E,
}

/// Terminal result of a retried operation.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome<T, E> {
    /// The operation succeeded on `attempt`.
    Success { value: T, attempt: u32 },
    /// The operation failed; `error` is the last error observed.
    Failure { error: E, attempts: u32 },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Success { .. })
    }

    /// Number of attempts that were made.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Success { attempt, .. } => *attempt,
            RetryOutcome::Failure { attempts, .. } => *attempts,
        }
    }

    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryOutcome::Success { value, .. } => Ok(value),
            RetryOutcome::Failure { error, .. } => Err(error),
        }
    }
}

/// Exponential backoff executor.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Delay after the given failed attempt (1-based).
    ///
    /// `min(max_delay, initial_delay * multiplier^(attempt-1))`, saturating.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.policy.initial_delay.as_secs_f64() * self.policy.multiplier.powi(exponent);

        if !secs.is_finite() || secs >= self.policy.max_delay.as_secs_f64() {
            return self.policy.max_delay;
        }

        Duration::try_from_secs_f64(secs).unwrap_or(self.policy.max_delay)
    }

    /// Run `operation` until it succeeds, fails non-retryably, or attempts run out.
    ///
    /// `operation` receives the 1-based attempt number. `on_retry` is called
    /// before every wait and cannot influence control flow.
    pub async fn execute<T, E, F, Fut, R, O>(
        &self,
        operation: F,
        is_retryable: R,
        on_retry: O,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        O: FnMut(RetryAttempt<'_, E>),
        E: Display,
    {
        let never = futures::future::pending::<Infallible>();
        match self.run(never, operation, is_retryable, on_retry).await {
            Ok(outcome) => outcome,
            Err(never) => match never {},
        }
    }

    /// Like [`execute`](Self::execute), but gives up as soon as `cancel` fires.
    ///
    /// Returns `None` if the token is cancelled before or during an attempt or
    /// a backoff wait. No further attempts are made after cancellation.
    pub async fn execute_cancellable<T, E, F, Fut, R, O>(
        &self,
        cancel: &CancellationToken,
        operation: F,
        is_retryable: R,
        on_retry: O,
    ) -> Option<RetryOutcome<T, E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        O: FnMut(RetryAttempt<'_, E>),
        E: Display,
    {
        self.run(cancel.cancelled(), operation, is_retryable, on_retry)
            .await
            .ok()
    }

    async fn run<T, E, F, Fut, R, O, C>(
        &self,
        cancelled: C,
        mut operation: F,
        is_retryable: R,
        mut on_retry: O,
    ) -> Result<RetryOutcome<T, E>, C::Output>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        O: FnMut(RetryAttempt<'_, E>),
        E: Display,
        C: Future,
    {
        let mut cancelled = std::pin::pin!(cancelled);
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let result = core_async::select! {
                biased;
                reason = &mut cancelled => return Err(reason),
                result = operation(attempt) => result,
            };

            let error = match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Operation succeeded after retry");
                    }
                    return Ok(RetryOutcome::Success { value, attempt });
                }
                Err(error) => error,
            };

            if !is_retryable(&error) {
                debug!(attempt, error = %error, "Operation failed with non-retryable error");
                return Ok(RetryOutcome::Failure {
                    error,
                    attempts: attempt,
                });
            }

            if attempt >= max_attempts {
                warn!(attempt, error = %error, "Operation failed, retries exhausted");
                return Ok(RetryOutcome::Failure {
                    error,
                    attempts: attempt,
                });
            }

            let delay = self.delay_for_attempt(attempt);
            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Operation failed, retrying"
            );
            on_retry(RetryAttempt {
                attempt,
                max_attempts,
                next_delay: delay,
                error: &error,
            });

            core_async::select! {
                biased;
                reason = &mut cancelled => return Err(reason),
                _ = sleep(delay) => {}
            }

            attempt += 1;
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_async::time::Instant;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_delay_schedule() {
        let executor = RetryExecutor::new(policy(10));
        assert_eq!(executor.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(executor.delay_for_attempt(2), Duration::from_millis(1_000));
        assert_eq!(executor.delay_for_attempt(3), Duration::from_millis(2_000));
        assert_eq!(executor.delay_for_attempt(4), Duration::from_millis(4_000));
        assert_eq!(executor.delay_for_attempt(5), Duration::from_secs(5));
        assert_eq!(executor.delay_for_attempt(u32::MAX), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let executor = RetryExecutor::new(policy(3));
        let calls = Arc::new(AtomicU32::new(0));
        let mut observed = Vec::new();
        let started = Instant::now();

        let outcome = executor
            .execute(
                |attempt| {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        if attempt < 3 {
                            Err(format!("attempt {} failed", attempt))
                        } else {
                            Ok(attempt * 10)
                        }
                    }
                },
                |_| true,
                |info| observed.push((info.attempt, info.next_delay, info.error.clone())),
            )
            .await;

        assert_eq!(
            outcome,
            RetryOutcome::Success {
                value: 30,
                attempt: 3
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            observed,
            vec![
                (1, Duration::from_millis(500), "attempt 1 failed".to_string()),
                (2, Duration::from_millis(1_000), "attempt 2 failed".to_string()),
            ]
        );
        assert!(started.elapsed() >= Duration::from_millis(1_500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_attempts() {
        let executor = RetryExecutor::new(policy(3));
        let outcome: RetryOutcome<(), String> = executor
            .execute(
                |attempt| async move { Err(format!("boom {}", attempt)) },
                |_| true,
                |_| {},
            )
            .await;

        assert_eq!(
            outcome,
            RetryOutcome::Failure {
                error: "boom 3".to_string(),
                attempts: 3
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_short_circuits() {
        let executor = RetryExecutor::new(policy(5));
        let calls = AtomicU32::new(0);
        let mut retries = 0;

        let outcome: RetryOutcome<(), &str> = executor
            .execute(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("fatal") }
                },
                |err| *err != "fatal",
                |_| retries += 1,
            )
            .await;

        assert!(!outcome.is_success());
        assert_eq!(outcome.attempts(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_stops_attempts() {
        let executor = RetryExecutor::new(policy(5));
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let canceller = token.clone();
        let outcome: Option<RetryOutcome<(), String>> = executor
            .execute_cancellable(
                &token,
                |_| {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err("unreachable host".to_string())
                    }
                },
                |_| true,
                |_| canceller.cancel(),
            )
            .await;

        assert!(outcome.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_cancelled_makes_no_attempt() {
        let executor = RetryExecutor::new(policy(3));
        let token = CancellationToken::new();
        token.cancel();
        let calls = AtomicU32::new(0);

        let outcome: Option<RetryOutcome<(), String>> = executor
            .execute_cancellable(
                &token,
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                },
                |_| true,
                |_| {},
            )
            .await;

        assert!(outcome.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uncancelled_token_behaves_like_execute() {
        let executor = RetryExecutor::new(policy(2));
        let token = CancellationToken::new();

        let outcome: Option<RetryOutcome<u32, String>> = executor
            .execute_cancellable(&token, |attempt| async move { Ok(attempt) }, |_| true, |_| {})
            .await;

        assert_eq!(
            outcome,
            Some(RetryOutcome::Success {
                value: 1,
                attempt: 1
            })
        );
    }
}
