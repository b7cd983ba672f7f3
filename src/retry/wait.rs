//! Polling for remote state transitions.

use std::future::Future;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use crate::error::{ApiError, ProviderError};

/// Why [`poll_until`] stopped without a value.
#[derive(Debug, Error)]
pub enum WaitError<E> {
    /// The refresh function failed.
    #[error(transparent)]
    Failed(E),

    /// The target state was not reached in time.
    #[error("timed out after {waited:?} waiting for {target}")]
    Timeout {
        /// What was being waited for.
        target: String,
        /// How long the wait lasted.
        waited: Duration,
    },
}

impl From<WaitError<ApiError>> for ProviderError {
    fn from(err: WaitError<ApiError>) -> Self {
        match err {
            WaitError::Failed(e) => e.into(),
            e @ WaitError::Timeout { .. } => ProviderError::DeadlineExceeded(e.to_string()),
        }
    }
}

/// Call `refresh` every `interval` until it yields `Some`, fails, or
/// `timeout` passes.
///
/// `refresh` is always invoked at least once, so a zero timeout still
/// observes the current state.
pub async fn poll_until<T, E, F, Fut>(
    what: &str,
    interval: Duration,
    timeout: Duration,
    mut refresh: F,
) -> Result<T, WaitError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let started = Instant::now();
    let mut polls = 0u32;

    loop {
        polls += 1;
        if let Some(value) = refresh().await.map_err(WaitError::Failed)? {
            debug!(what, polls, "Wait condition reached");
            return Ok(value);
        }

        let waited = started.elapsed();
        if waited + interval > timeout {
            return Err(WaitError::Timeout {
                target: what.to_string(),
                waited,
            });
        }

        debug!(what, polls, "Still waiting");
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_returns_once_ready() {
        let polls = AtomicU32::new(0);
        let result: Result<&str, WaitError<String>> = poll_until(
            "ACTIVE",
            Duration::from_millis(1),
            Duration::from_secs(1),
            || {
                let n = polls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Ok(if n == 3 { Some("ACTIVE") } else { None }) }
            },
        )
        .await;

        assert_eq!(result.unwrap(), "ACTIVE");
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_times_out() {
        let result: Result<(), WaitError<String>> = poll_until(
            "INSYNC",
            Duration::from_millis(5),
            Duration::from_millis(20),
            || async { Ok(None) },
        )
        .await;

        match result.unwrap_err() {
            WaitError::Timeout { target, .. } => assert_eq!(target, "INSYNC"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_refresh_error_propagates() {
        let result: Result<(), WaitError<String>> = poll_until(
            "ACTIVE",
            Duration::from_millis(1),
            Duration::from_secs(1),
            || async { Err("describe failed".to_string()) },
        )
        .await;

        assert!(matches!(result.unwrap_err(), WaitError::Failed(e) if e == "describe failed"));
    }

    #[tokio::test]
    async fn test_zero_timeout_polls_once() {
        let polls = AtomicU32::new(0);
        let result: Result<(), WaitError<String>> =
            poll_until("gone", Duration::from_millis(1), Duration::ZERO, || {
                polls.fetch_add(1, Ordering::SeqCst);
                async { Ok(None) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(polls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_into_provider_error() {
        let err: ProviderError = WaitError::Failed(ApiError::not_found(
            "ResourceNotFoundException",
            "stream events",
        ))
        .into();
        assert!(matches!(err, ProviderError::NotFound(_)));

        let err: ProviderError = WaitError::<ApiError>::Timeout {
            target: "stream ACTIVE".to_string(),
            waited: Duration::from_secs(300),
        }
        .into();
        assert!(matches!(err, ProviderError::DeadlineExceeded(_)));
    }
}
