//! Retry with exponential backoff
//!
//! Every network-facing call site passes a [`RetryPolicy`] value. Only
//! errors that report themselves as transient are retried; anything else is
//! returned on the first failure.

use std::future::Future;
use std::time::Duration;

/// Errors that can be classified for retrying
pub trait Retryable: std::error::Error {
    /// Transport-class failure worth another attempt
    fn is_transient(&self) -> bool;

    /// Error to report when an attempt exceeds its timeout
    fn timed_out(after: Duration) -> Self
    where
        Self: Sized;
}

/// Bounded attempts with `base_delay * 2^n` waits between them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            attempt_timeout: None,
        }
    }
}

impl RetryPolicy {
    /// `max_attempts` is raised to 1 if zero
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            attempt_timeout: None,
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Wait before retry `retry` (0-indexed)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor)
    }

    /// Run `op` until it succeeds, fails non-transiently, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number. The last error is returned
    /// unchanged.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let outcome = match self.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, op(attempt)).await {
                    Ok(result) => result,
                    Err(_) => Err(E::timed_out(limit)),
                },
                None => op(attempt).await,
            };

            let error = match outcome {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !error.is_transient() {
                tracing::debug!("{} failed permanently on attempt {}: {}", label, attempt, error);
                return Err(error);
            }

            if attempt >= max_attempts {
                tracing::warn!(
                    "{} failed after {} attempts: {}",
                    label,
                    max_attempts,
                    error
                );
                return Err(error);
            }

            let wait = self.delay_for(attempt - 1);
            tracing::warn!(
                attempt,
                wait_ms = wait.as_millis() as u64,
                "{} attempt {} failed: {}. Retrying",
                label,
                attempt,
                error
            );
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, thiserror::Error, PartialEq)]
    enum TestError {
        #[error("flaky")]
        Flaky,
        #[error("bad input")]
        BadInput,
        #[error("timed out")]
        TimedOut,
    }

    impl Retryable for TestError {
        fn is_transient(&self) -> bool {
            matches!(self, TestError::Flaky | TestError::TimedOut)
        }

        fn timed_out(_after: Duration) -> Self {
            TestError::TimedOut
        }
    }

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::ZERO)
    }

    #[test]
    fn test_delay_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
    }

    #[test]
    fn test_zero_attempts_raised_to_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test]
    async fn test_transient_failure_then_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = fast(3)
            .run("flaky", move |_| async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError::Flaky)
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = fast(3)
            .run("down", move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Flaky)
            })
            .await;

        assert_eq!(result, Err(TestError::Flaky));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = fast(3)
            .run("bad", move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::BadInput)
            })
            .await;

        assert_eq!(result, Err(TestError::BadInput));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_timeout_counts_as_transient() {
        let counter = AtomicU32::new(0);
        let policy = fast(2).with_attempt_timeout(Duration::from_millis(20));
        let result = policy
            .run("slow", |attempt| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 1 {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    Ok::<_, TestError>(attempt)
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
