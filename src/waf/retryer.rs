//! Change-token guarded mutations.
//!
//! WAF accepts a mutation only if it carries the most recently issued,
//! unconsumed change token of its scope. Two writers in the same scope race
//! at the API: the loser gets `WAFStaleDataException` and must fetch a new
//! token and try again. [`WafRetryer`] runs that loop:
//!
//! ```text
//! FetchToken -> Invoke -> Success        -> (wait INSYNC) -> done
//!                      -> retryable error -> backoff -> FetchToken
//!                      -> other error     -> done(error)
//! ```
//!
//! No in-process lock is taken; conflicts are resolved purely by retrying.

use std::future::Future;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::api::WafApi;
use super::token::{ChangeToken, ChangeTokenStatus, TokenScope};
use crate::config::WafSettings;
use crate::error::{ApiError, ProviderError};
use crate::retry::{poll_until, retry_with_backoff, RetryError, WaitError};

/// Why a token-guarded mutation failed.
#[derive(Debug, Error)]
pub enum WafError {
    /// The mutation failed, or the retry budget ran out.
    #[error(transparent)]
    Retry(#[from] RetryError<ApiError>),

    /// The mutation succeeded but its token never reached `INSYNC`.
    #[error("change token {token} not INSYNC after {waited:?}")]
    SyncTimeout {
        /// The token used by the successful mutation.
        token: ChangeToken,
        /// How long the wait lasted.
        waited: Duration,
    },

    /// The mutation succeeded but reading its token status failed.
    #[error("reading status of change token {token}: {source}")]
    SyncStatus {
        /// The token used by the successful mutation.
        token: ChangeToken,
        /// The non-retryable status error.
        source: ApiError,
    },
}

impl WafError {
    /// The API error behind this failure, if any.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Retry(RetryError::Fatal(e)) | Self::Retry(RetryError::Exhausted { last: e, .. }) => {
                Some(e)
            },
            Self::Retry(RetryError::DeadlineExceeded { last, .. }) => last.as_ref(),
            Self::SyncStatus { source, .. } => Some(source),
            Self::SyncTimeout { .. } => None,
        }
    }

    /// Whether the mutation failed because its target does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Retry(RetryError::Fatal(e)) if e.is_not_found())
    }
}

impl From<WafError> for ProviderError {
    fn from(err: WafError) -> Self {
        match err {
            WafError::Retry(RetryError::Fatal(e)) => e.into(),
            WafError::Retry(e @ RetryError::Exhausted { .. }) => {
                ProviderError::RetriesExhausted(e.to_string())
            },
            WafError::Retry(e @ RetryError::DeadlineExceeded { .. }) => {
                ProviderError::DeadlineExceeded(e.to_string())
            },
            e @ WafError::SyncTimeout { .. } => ProviderError::DeadlineExceeded(e.to_string()),
            WafError::SyncStatus { token, source } => {
                ProviderError::from(source).with_context(format!("waiting for change token {}", token))
            },
        }
    }
}

/// Runs mutations with a fresh change token, retrying token conflicts.
///
/// The token scope is the one `api` reports, so tokens are always drawn
/// from the endpoint the mutations are sent to. Cheap to build; construct
/// one per resource operation.
pub struct WafRetryer<'a> {
    api: &'a dyn WafApi,
    scope: TokenScope,
    settings: &'a WafSettings,
}

impl<'a> WafRetryer<'a> {
    /// Create a retryer drawing tokens from `api`.
    pub fn new(api: &'a dyn WafApi, settings: &'a WafSettings) -> Self {
        Self {
            api,
            scope: api.scope(),
            settings,
        }
    }

    /// The scope tokens are drawn from.
    pub fn scope(&self) -> &TokenScope {
        &self.scope
    }

    /// Fetch a token, run `attempt` with it, and retry the whole cycle on
    /// token conflicts, locked scopes, and throttling.
    ///
    /// Any other error is returned at once. When a sync timeout is
    /// configured, a successful mutation is followed by a wait for its token
    /// to reach `INSYNC`.
    pub async fn retry_with_token<T, F, Fut>(&self, attempt: F) -> Result<T, WafError>
    where
        F: Fn(ChangeToken) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let (token, value) = self.mutate(attempt).await?;
        self.wait_for_sync(&token).await?;
        Ok(value)
    }

    /// Run the fetch-token/attempt cycle without waiting for `INSYNC`.
    ///
    /// Returns the token the successful attempt consumed, for a later
    /// [`wait_for_sync`](Self::wait_for_sync).
    pub async fn mutate<T, F, Fut>(&self, attempt: F) -> Result<(ChangeToken, T), WafError>
    where
        F: Fn(ChangeToken) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let policy = self.settings.retry_policy();
        let api = self.api;
        let scope = &self.scope;
        let attempt = &attempt;

        let outcome = retry_with_backoff(&policy, ApiError::is_retryable, move |n| async move {
            let token = api.get_change_token().await?;
            debug!(scope = %scope, attempt = n, token = %token, "Fetched change token");
            let value = attempt(token.clone()).await?;
            Ok::<_, ApiError>((token, value))
        })
        .await;

        outcome.map_err(|err| {
            if !matches!(err, RetryError::Fatal(_)) {
                error!(scope = %scope, attempts = err.attempts(), error = %err, "Giving up on WAF mutation");
            }
            err.into()
        })
    }

    /// Poll `token` until it is `INSYNC`. Returns at once when no sync
    /// timeout is configured.
    ///
    /// Throttling and other retryable status errors keep the wait going.
    pub async fn wait_for_sync(&self, token: &ChangeToken) -> Result<(), WafError> {
        let Some(timeout) = self.settings.sync_timeout() else {
            return Ok(());
        };
        let started = Instant::now();
        let api = self.api;

        let waited = poll_until(
            "change token INSYNC",
            self.settings.sync_poll_interval(),
            timeout,
            || async move {
                match api.get_change_token_status(token).await {
                    Ok(status) => {
                        debug!(token = %token, status = %status, "Polled change token");
                        Ok((status == ChangeTokenStatus::InSync).then_some(()))
                    },
                    // The mutation already landed; keep polling through transient errors.
                    Err(e) if e.is_retryable() => {
                        warn!(token = %token, error = %e, "Change token status unavailable, polling again");
                        Ok(None)
                    },
                    Err(e) => Err(e),
                }
            },
        )
        .await;

        match waited {
            Ok(()) => {
                info!(scope = %self.scope, token = %token, elapsed = ?started.elapsed(), "Change token in sync");
                Ok(())
            },
            Err(WaitError::Failed(source)) => Err(WafError::SyncStatus {
                token: token.clone(),
                source,
            }),
            Err(WaitError::Timeout { waited, .. }) => Err(WafError::SyncTimeout {
                token: token.clone(),
                waited,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeWaf;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn fast_settings() -> WafSettings {
        WafSettings {
            max_attempts: 5,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
            deadline_secs: 10,
            sync_timeout_secs: None,
            sync_poll_interval_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_retries_token_conflicts_then_succeeds() {
        let waf = FakeWaf::new();
        let settings = fast_settings();
        let retryer = WafRetryer::new(&waf, &settings);

        let script = Mutex::new(vec![
            Ok("RULE123"),
            Err(ApiError::token_conflict()),
            Err(ApiError::token_conflict()),
        ]);
        let seen = Mutex::new(Vec::new());

        let result = retryer
            .retry_with_token(|token| {
                seen.lock().unwrap().push(token);
                let next = script.lock().unwrap().pop().unwrap();
                async move { next }
            })
            .await;

        assert_eq!(result.unwrap(), "RULE123");
        assert_eq!(waf.token_fetches(), 3);
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_fetches_one_token() {
        let settings = fast_settings();
        let waf = FakeWaf::regional("us-west-2");
        let retryer = WafRetryer::new(&waf, &settings);
        assert_eq!(retryer.scope(), &TokenScope::Regional("us-west-2".into()));
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retryer
            .retry_with_token(|_token| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ApiError::validation("WAFInvalidParameterException", "bad size")) }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.api_error().unwrap().code, "WAFInvalidParameterException");
        assert!(matches!(err, WafError::Retry(RetryError::Fatal(_))));
        assert_eq!(waf.token_fetches(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_always_conflicting_exhausts_budget() {
        let waf = FakeWaf::new();
        let settings = fast_settings();
        let retryer = WafRetryer::new(&waf, &settings);

        let result: Result<(), _> = retryer
            .retry_with_token(|_token| async { Err(ApiError::token_conflict()) })
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, WafError::Retry(RetryError::Exhausted { attempts: 5, .. })));
        assert_eq!(waf.token_fetches(), 5);

        let provider_err: ProviderError = err.into();
        assert!(matches!(provider_err, ProviderError::RetriesExhausted(_)));
    }

    #[tokio::test]
    async fn test_throttled_token_fetch_is_retried() {
        let waf = FakeWaf::new();
        waf.inject_failure("GetChangeToken", ApiError::throttled());
        let settings = fast_settings();
        let retryer = WafRetryer::new(&waf, &settings);

        let result = retryer
            .retry_with_token(|token| async move { Ok(token.to_string()) })
            .await;

        assert!(result.is_ok());
        assert_eq!(waf.token_fetches(), 2);
    }

    #[tokio::test]
    async fn test_real_conflict_leaves_one_outstanding_token() {
        let waf = FakeWaf::new();
        let settings = fast_settings();
        let retryer = WafRetryer::new(&waf, &settings);
        let api: &dyn WafApi = &waf;

        // Another writer grabs and consumes the current token before our first attempt.
        let interleaved = AtomicU32::new(0);
        let set = retryer
            .retry_with_token(|token| {
                let first = interleaved.fetch_add(1, Ordering::SeqCst) == 0;
                async move {
                    if first {
                        let theirs = api.get_change_token().await?;
                        api.create_size_constraint_set(&theirs, "theirs").await?;
                    }
                    api.create_size_constraint_set(&token, "ours").await
                }
            })
            .await
            .unwrap();

        assert_eq!(set.name, "ours");
        assert!(waf.outstanding_tokens() <= 1);
        assert_eq!(interleaved.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_waits_for_insync() {
        let waf = FakeWaf::new();
        waf.set_sync_delay(2);
        let settings = WafSettings {
            sync_timeout_secs: Some(5),
            ..fast_settings()
        };
        let retryer = WafRetryer::new(&waf, &settings);
        let api = &waf;

        let set = retryer
            .retry_with_token(|token| async move { api.create_size_constraint_set(&token, "s").await })
            .await
            .unwrap();

        assert_eq!(set.name, "s");
        assert_eq!(waf.status_polls(), 3);
    }

    #[tokio::test]
    async fn test_sync_timeout() {
        let waf = FakeWaf::new();
        waf.set_sync_delay(u32::MAX);
        let settings = WafSettings {
            sync_timeout_secs: Some(0),
            ..fast_settings()
        };
        let retryer = WafRetryer::new(&waf, &settings);
        let api = &waf;

        let err = retryer
            .retry_with_token(|token| async move { api.create_rule(&token, "r", "r").await })
            .await
            .unwrap_err();

        assert!(matches!(err, WafError::SyncTimeout { .. }));
        let provider_err: ProviderError = err.into();
        assert!(matches!(provider_err, ProviderError::DeadlineExceeded(_)));
    }

    #[tokio::test]
    async fn test_throttled_status_poll_keeps_waiting() {
        let waf = FakeWaf::new();
        waf.set_sync_delay(1);
        waf.inject_failure("GetChangeTokenStatus", ApiError::throttled());
        let settings = WafSettings {
            sync_timeout_secs: Some(5),
            ..fast_settings()
        };
        let retryer = WafRetryer::new(&waf, &settings);
        let api = &waf;

        let rule = retryer
            .retry_with_token(|token| async move { api.create_rule(&token, "r", "r").await })
            .await
            .unwrap();

        assert!(waf.rule(&rule.id).is_some());
        assert_eq!(waf.token_fetches(), 1);
        assert_eq!(waf.status_polls(), 3);
    }

    #[tokio::test]
    async fn test_status_poll_failure_is_not_a_mutation_failure() {
        let waf = FakeWaf::new();
        waf.inject_failure(
            "GetChangeTokenStatus",
            ApiError::new("AccessDeniedException", "not allowed"),
        );
        let settings = WafSettings {
            sync_timeout_secs: Some(5),
            ..fast_settings()
        };
        let retryer = WafRetryer::new(&waf, &settings);
        let api = &waf;

        let err = retryer
            .retry_with_token(|token| async move { api.create_rule(&token, "r", "r").await })
            .await
            .unwrap_err();

        assert!(matches!(err, WafError::SyncStatus { .. }));
        assert!(!err.is_not_found());
        assert_eq!(err.api_error().unwrap().code, "AccessDeniedException");
        let provider_err: ProviderError = err.into();
        assert!(matches!(provider_err, ProviderError::PermissionDenied(_)));
    }
}
