//! Bounded retry loop with optional exponential backoff
//!
//! Every operation in this crate that talks to the network runs inside [`with_retry`]:
//! the fetcher's HTTP attempts and the dispatcher's send-and-acknowledge round trips.
//! The loop makes at most `max_attempts` attempts in total. With a zero
//! `initial_delay` it retries immediately; otherwise delays grow exponentially up to
//! `max_delay`, optionally with jitter to prevent thundering herd.
//!
//! # Example
//!
//! ```no_run
//! use cluster_dl::retry::{IsRetryable, with_retry};
//! use cluster_dl::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "transient")
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() {
//! let config = RetryConfig::immediate(3);
//! let result = with_retry(&config, |_attempt| async { Ok::<_, MyError>(()) }).await;
//! assert!(result.is_ok());
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{DispatchError, FetchError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if another attempt could succeed
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            // Transport, non-200 and local filesystem failures all count against
            // the attempt budget
            FetchError::Transport { .. }
            | FetchError::Stalled { .. }
            | FetchError::HttpStatus { .. }
            | FetchError::Filesystem { .. } => true,
            // No later attempt can fix the job itself
            FetchError::InvalidUrl { .. } | FetchError::RenameExhausted { .. } => false,
        }
    }
}

impl IsRetryable for DispatchError {
    fn is_retryable(&self) -> bool {
        true
    }
}

/// The loop gave up: the last error and how many attempts were made
#[derive(Debug)]
pub struct Exhausted<E> {
    /// Number of attempts made (1 for a non-retryable first failure)
    pub attempts: u32,
    /// Error from the final attempt
    pub last_error: E,
}

/// Run `operation` until it succeeds, fails permanently, or `max_attempts` is reached
///
/// The closure receives the 1-based attempt number. On success the value is returned
/// together with the number of attempts used.
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
) -> Result<(T, u32), Exhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    let mut delay = config.initial_delay;

    loop {
        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok((result, attempt));
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis(),
                    "Attempt failed, retrying"
                );
                attempt += 1;

                if !delay.is_zero() {
                    let wait = if config.jitter { add_jitter(delay) } else { delay };
                    tokio::time::sleep(wait).await;

                    let next_delay =
                        Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                    delay = next_delay.min(config.max_delay);
                }
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        "Operation failed after all attempts exhausted"
                    );
                } else {
                    tracing::error!(error = %e, "Operation failed with non-retryable error");
                }
                return Err(Exhausted {
                    attempts: attempt,
                    last_error: e,
                });
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// The result is uniformly distributed between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Transient,
        Permanent,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Transient => write!(f, "transient error"),
                TestError::Permanent => write!(f, "permanent error"),
            }
        }
    }

    impl IsRetryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    #[tokio::test]
    async fn test_success_no_retry() {
        let config = RetryConfig::immediate(3);
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&config, |_| {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), (42, 1));
        assert_eq!(counter.load(Ordering::SeqCst), 1, "should only call once");
    }

    #[tokio::test]
    async fn test_retry_transient_then_succeed() {
        let config = RetryConfig::immediate(3);
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&config, |_| {
            let counter = counter_clone.clone();
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err(TestError::Transient)
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), (42, 3));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_after_exactly_max_attempts() {
        let config = RetryConfig::immediate(3);
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&config, |_| {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError::Transient)
            }
        })
        .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 3);
        assert!(matches!(exhausted.last_error, TestError::Transient));
        assert_eq!(
            counter.load(Ordering::SeqCst),
            3,
            "max_attempts counts the first attempt"
        );
    }

    #[tokio::test]
    async fn test_permanent_error_no_retry() {
        let config = RetryConfig::immediate(5);
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&config, |_| {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError::Permanent)
            }
        })
        .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_numbers_are_one_based_and_sequential() {
        let config = RetryConfig::immediate(4);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let _ = with_retry(&config, |attempt| {
            let seen = seen_clone.clone();
            async move {
                seen.lock().unwrap().push(attempt);
                Err::<(), _>(TestError::Transient)
            }
        })
        .await;

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn zero_max_attempts_still_runs_once() {
        let config = RetryConfig::immediate(0);
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&config, |_| {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TestError::Transient)
            }
        })
        .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exponential_backoff() {
        let config = RetryConfig {
            max_attempts: 4,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: false,
        };

        let start = std::time::Instant::now();
        let _ = with_retry(&config, |_| async { Err::<(), _>(TestError::Transient) }).await;
        let elapsed = start.elapsed();

        // Three waits between four attempts: 10ms + 20ms + 40ms = 70ms
        assert!(
            elapsed >= Duration::from_millis(70),
            "should wait at least 70ms, waited {:?}",
            elapsed
        );
        assert!(
            elapsed < Duration::from_secs(2),
            "should not wait too long, waited {:?}",
            elapsed
        );
    }

    #[tokio::test]
    async fn test_zero_delay_retries_immediately() {
        let config = RetryConfig {
            max_attempts: 50,
            initial_delay: Duration::ZERO,
            jitter: true,
            ..Default::default()
        };

        let start = std::time::Instant::now();
        let _ = with_retry(&config, |_| async { Err::<(), _>(TestError::Transient) }).await;

        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let delay = Duration::from_millis(100);
        for _ in 0..100 {
            let jittered = add_jitter(delay);
            assert!(jittered >= delay);
            assert!(jittered <= delay * 2);
        }
    }

    #[test]
    fn fetch_error_retry_classification() {
        let status = FetchError::HttpStatus {
            status: 503,
            url: "http://example.com".into(),
        };
        assert!(status.is_retryable());

        let stalled = FetchError::Stalled {
            url: "http://example.com".into(),
            idle: Duration::from_secs(1),
        };
        assert!(stalled.is_retryable());

        let fs = FetchError::Filesystem {
            path: "/nope".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(fs.is_retryable(), "filesystem errors count toward the budget");

        let invalid = FetchError::InvalidUrl {
            url: "::".into(),
            reason: "bad".into(),
        };
        assert!(!invalid.is_retryable());
    }

    #[test]
    fn dispatch_errors_are_always_retryable() {
        let err = DispatchError::Timeout {
            endpoint: "127.0.0.1:1".into(),
            stage: "connect",
        };
        assert!(err.is_retryable());
    }
}
