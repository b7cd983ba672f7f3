//! Retry and wait helpers.
//!
//! [`retry_with_backoff`] is a generic retry loop parameterised by a
//! retryable-error predicate. It knows nothing about AWS; the WAF change
//! token retrier and the SNS policy writer both build on it.
//!
//! [`poll_until`] repeatedly refreshes remote state until it settles, the way
//! stream creation waits for `ACTIVE`.

mod backoff;
mod wait;

pub use backoff::RetryPolicy;
pub use wait::{poll_until, WaitError};

use std::future::Future;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

/// Why a retried operation gave up.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The operation failed with a non-retryable error.
    #[error(transparent)]
    Fatal(E),

    /// Every allowed attempt failed with a retryable error.
    #[error("gave up after {attempts} attempt(s): {last}")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The error from the final attempt.
        last: E,
    },

    /// The wall-clock deadline passed before the operation succeeded.
    #[error("deadline exceeded after {elapsed:?} and {attempts} attempt(s)")]
    DeadlineExceeded {
        /// Time spent before giving up.
        elapsed: Duration,
        /// Number of attempts started.
        attempts: u32,
        /// The last retryable error, if an attempt completed.
        last: Option<E>,
    },
}

impl<E> RetryError<E> {
    /// The underlying error, if one was observed.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Fatal(e) => Some(e),
            Self::Exhausted { last, .. } => Some(last),
            Self::DeadlineExceeded { last, .. } => last,
        }
    }

    /// Number of attempts made before giving up. Fatal errors report one.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Fatal(_) => 1,
            Self::Exhausted { attempts, .. } | Self::DeadlineExceeded { attempts, .. } => {
                *attempts
            },
        }
    }

    /// Whether the attempt budget ran out.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

/// Run `op` until it succeeds, fails fatally, or the policy gives up.
///
/// `op` receives the 1-based attempt number. After a retryable failure the
/// loop sleeps for [`RetryPolicy::delay_for`] before the next attempt. If
/// the policy carries a deadline, an attempt still running at the deadline is
/// abandoned and a sleep that would cross it is not started.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use hemmer_provider_aws::retry::{retry_with_backoff, RetryPolicy};
///
/// # tokio_test::block_on(async {
/// let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(4));
/// let result: Result<u32, _> = retry_with_backoff(
///     &policy,
///     |e: &&str| *e == "busy",
///     |attempt| async move { if attempt < 3 { Err("busy") } else { Ok(attempt) } },
/// )
/// .await;
/// assert_eq!(result.unwrap(), 3);
/// # });
/// ```
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    is_retryable: P,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let started = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let outcome = match policy.deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_sub(started.elapsed());
                match tokio::time::timeout(remaining, op(attempt)).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        return Err(RetryError::DeadlineExceeded {
                            elapsed: started.elapsed(),
                            attempts: attempt,
                            last: None,
                        })
                    },
                }
            },
            None => op(attempt).await,
        };

        let err = match outcome {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            },
            Err(err) => err,
        };

        if !is_retryable(&err) {
            debug!(attempt, error = %err, "Non-retryable failure");
            return Err(RetryError::Fatal(err));
        }

        if attempt >= max_attempts {
            warn!(attempts = attempt, error = %err, "Retry budget exhausted");
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: err,
            });
        }

        let delay = policy.delay_for(attempt);
        if let Some(deadline) = policy.deadline {
            if started.elapsed() + delay >= deadline {
                warn!(attempts = attempt, error = %err, "Retry deadline reached");
                return Err(RetryError::DeadlineExceeded {
                    elapsed: started.elapsed(),
                    attempts: attempt,
                    last: Some(err),
                });
            }
        }

        warn!(attempt, delay = ?delay, error = %err, "Retryable failure, backing off");
        tokio::time::sleep(delay).await;
    }
}
