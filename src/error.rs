//! Error types for the AWS provider.
//!
//! Two layers of errors exist:
//!
//! - [`ApiError`] describes a failure reported by a remote AWS control API,
//!   classified by [`ApiErrorKind`] so retry loops can decide what to do.
//! - [`ProviderError`] is what resource operations hand back to the provider
//!   framework, usually wrapped with operation context.

use thiserror::Error;

/// Errors surfaced by provider operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested resource was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The remote API failed in a way that has no more specific variant.
    #[error("SDK error: {0}")]
    Sdk(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Permission denied (authentication/authorization failure).
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Quota or rate limit exceeded.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A retried operation used up its attempt budget.
    #[error("Retries exhausted: {0}")]
    RetriesExhausted(String),

    /// Operation timed out.
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Operation failed due to current state (precondition not met).
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    /// Operation not implemented.
    #[error("Unimplemented: {0}")]
    Unimplemented(String),
}

impl ProviderError {
    /// Get the error message as a string.
    pub fn message(&self) -> &str {
        match self {
            Self::NotFound(msg) => msg,
            Self::Validation(msg) => msg,
            Self::Sdk(msg) => msg,
            Self::Configuration(msg) => msg,
            Self::UnknownResource(msg) => msg,
            Self::Serialization(_err) => "serialization error (see Debug output)",
            Self::PermissionDenied(msg) => msg,
            Self::ResourceExhausted(msg) => msg,
            Self::RetriesExhausted(msg) => msg,
            Self::DeadlineExceeded(msg) => msg,
            Self::FailedPrecondition(msg) => msg,
            Self::Unimplemented(msg) => msg,
        }
    }

    /// Prefix the message with operation context, keeping the variant.
    ///
    /// # Examples
    ///
    /// ```
    /// use hemmer_provider_aws::ProviderError;
    ///
    /// let err = ProviderError::Validation("bad size".to_string())
    ///     .with_context("creating SizeConstraintSet");
    /// assert_eq!(err.message(), "creating SizeConstraintSet: bad size");
    /// ```
    pub fn with_context(self, context: impl std::fmt::Display) -> Self {
        let wrap = |msg: String| format!("{}: {}", context, msg);
        match self {
            Self::NotFound(msg) => Self::NotFound(wrap(msg)),
            Self::Validation(msg) => Self::Validation(wrap(msg)),
            Self::Sdk(msg) => Self::Sdk(wrap(msg)),
            Self::Configuration(msg) => Self::Configuration(wrap(msg)),
            Self::UnknownResource(msg) => Self::UnknownResource(msg),
            Self::Serialization(err) => Self::Validation(wrap(err.to_string())),
            Self::PermissionDenied(msg) => Self::PermissionDenied(wrap(msg)),
            Self::ResourceExhausted(msg) => Self::ResourceExhausted(wrap(msg)),
            Self::RetriesExhausted(msg) => Self::RetriesExhausted(wrap(msg)),
            Self::DeadlineExceeded(msg) => Self::DeadlineExceeded(wrap(msg)),
            Self::FailedPrecondition(msg) => Self::FailedPrecondition(wrap(msg)),
            Self::Unimplemented(msg) => Self::Unimplemented(wrap(msg)),
        }
    }
}

/// Classification of a remote API failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorKind {
    /// The change token was already used or is stale.
    TokenConflict,
    /// The target is busy with another mutation in the same scope.
    ScopeLocked,
    /// The request was throttled.
    Throttled,
    /// The referenced item does not exist.
    NotFound,
    /// The request was malformed or rejected as invalid.
    Validation,
    /// The caller is not allowed to perform the request.
    PermissionDenied,
    /// Any other failure, including transport errors.
    Other,
}

impl ApiErrorKind {
    /// Map an AWS error code to a kind.
    pub fn from_code(code: &str) -> Self {
        match code {
            "WAFStaleDataException" => Self::TokenConflict,
            "WAFUnavailableEntityException" | "ResourceInUseException" => Self::ScopeLocked,
            "ThrottlingException"
            | "Throttling"
            | "TooManyRequestsException"
            | "RequestLimitExceeded"
            | "LimitExceededException" => Self::Throttled,
            "WAFNonexistentItemException"
            | "ResourceNotFoundException"
            | "NotFound"
            | "NotFoundException" => Self::NotFound,
            "WAFInvalidParameterException"
            | "WAFInvalidOperationException"
            | "WAFDisallowedNameException"
            | "WAFNonEmptyEntityException"
            | "WAFReferencedItemException"
            | "InvalidParameter"
            | "InvalidParameterException"
            | "InvalidArgumentException"
            | "ValidationException" => Self::Validation,
            "AccessDeniedException"
            | "AuthorizationError"
            | "AuthorizationErrorException"
            | "UnrecognizedClientException" => Self::PermissionDenied,
            _ => Self::Other,
        }
    }
}

/// A failure reported by a remote control API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    /// How the failure should be handled.
    pub kind: ApiErrorKind,
    /// The service error code, e.g. `WAFStaleDataException`.
    pub code: String,
    /// The human-readable message from the service.
    pub message: String,
}

impl ApiError {
    /// Build an error from a service code, deriving the kind from it.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            kind: ApiErrorKind::from_code(&code),
            code,
            message: message.into(),
        }
    }

    /// A change-token conflict (`WAFStaleDataException`).
    pub fn token_conflict() -> Self {
        Self::new(
            "WAFStaleDataException",
            "The input token is no longer current",
        )
    }

    /// A throttled request.
    pub fn throttled() -> Self {
        Self::new("ThrottlingException", "Rate exceeded")
    }

    /// A missing item, keyed by service code.
    pub fn not_found(code: &str, what: impl std::fmt::Display) -> Self {
        Self::new(code, format!("{} does not exist", what))
    }

    /// A request rejected as invalid.
    pub fn validation(code: &str, message: impl Into<String>) -> Self {
        Self::new(code, message)
    }

    /// Whether a retry with a fresh token may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ApiErrorKind::TokenConflict | ApiErrorKind::ScopeLocked | ApiErrorKind::Throttled
        )
    }

    /// Whether the referenced item does not exist.
    pub fn is_not_found(&self) -> bool {
        self.kind == ApiErrorKind::NotFound
    }
}

impl From<ApiError> for ProviderError {
    fn from(err: ApiError) -> Self {
        let msg = err.to_string();
        match err.kind {
            ApiErrorKind::NotFound => ProviderError::NotFound(msg),
            ApiErrorKind::Validation => ProviderError::Validation(msg),
            ApiErrorKind::PermissionDenied => ProviderError::PermissionDenied(msg),
            ApiErrorKind::Throttled => ProviderError::ResourceExhausted(msg),
            ApiErrorKind::TokenConflict | ApiErrorKind::ScopeLocked => {
                ProviderError::FailedPrecondition(msg)
            },
            ApiErrorKind::Other => ProviderError::Sdk(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProviderError::NotFound("resource-123".to_string());
        assert_eq!(format!("{}", err), "Resource not found: resource-123");

        let err = ProviderError::RetriesExhausted("10 attempts".to_string());
        assert_eq!(format!("{}", err), "Retries exhausted: 10 attempts");

        let err = ProviderError::UnknownResource("aws_waf_ipset".to_string());
        assert_eq!(format!("{}", err), "Unknown resource type: aws_waf_ipset");
    }

    #[test]
    fn test_with_context_keeps_variant() {
        let err = ProviderError::NotFound("rule-1".to_string()).with_context("deleting WAF Rule");
        assert!(matches!(err, ProviderError::NotFound(_)));
        assert_eq!(err.message(), "deleting WAF Rule: rule-1");

        let err = ProviderError::UnknownResource("x".to_string()).with_context("ignored");
        assert_eq!(err.message(), "x");
    }

    #[test]
    fn test_kind_from_code() {
        assert_eq!(
            ApiErrorKind::from_code("WAFStaleDataException"),
            ApiErrorKind::TokenConflict
        );
        assert_eq!(
            ApiErrorKind::from_code("ThrottlingException"),
            ApiErrorKind::Throttled
        );
        assert_eq!(
            ApiErrorKind::from_code("WAFNonexistentItemException"),
            ApiErrorKind::NotFound
        );
        assert_eq!(
            ApiErrorKind::from_code("ResourceNotFoundException"),
            ApiErrorKind::NotFound
        );
        assert_eq!(
            ApiErrorKind::from_code("WAFInvalidParameterException"),
            ApiErrorKind::Validation
        );
        assert_eq!(
            ApiErrorKind::from_code("AccessDeniedException"),
            ApiErrorKind::PermissionDenied
        );
        assert_eq!(ApiErrorKind::from_code("Boom"), ApiErrorKind::Other);
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(ApiError::token_conflict().is_retryable());
        assert!(ApiError::throttled().is_retryable());
        assert!(ApiError::new("WAFUnavailableEntityException", "busy").is_retryable());
        assert!(!ApiError::validation("WAFInvalidParameterException", "bad").is_retryable());
        assert!(!ApiError::not_found("WAFNonexistentItemException", "rule").is_retryable());
    }

    #[test]
    fn test_api_error_to_provider_error() {
        let err: ProviderError = ApiError::not_found("NotFound", "topic").into();
        assert!(matches!(err, ProviderError::NotFound(_)));

        let err: ProviderError = ApiError::new("AccessDeniedException", "nope").into();
        assert!(matches!(err, ProviderError::PermissionDenied(_)));

        let err: ProviderError = ApiError::throttled().into();
        assert!(matches!(err, ProviderError::ResourceExhausted(_)));

        let err: ProviderError = ApiError::new("InternalFailure", "oops").into();
        assert_eq!(err.message(), "InternalFailure: oops");
    }
}
