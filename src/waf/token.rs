//! Change tokens and the scopes they are pooled in.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An opaque, single-use token authorising one WAF mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeToken(String);

impl ChangeToken {
    /// Wrap a token string issued by the API.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ChangeToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for ChangeToken {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

/// Propagation status of a change token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeTokenStatus {
    /// Issued but not yet used in a mutation.
    Provisioned,
    /// Used; the change is propagating.
    Pending,
    /// The change has reached every edge.
    #[serde(rename = "INSYNC")]
    InSync,
}

impl ChangeTokenStatus {
    /// Parse the API's status string.
    pub fn parse(status: &str) -> Option<Self> {
        match status {
            "PROVISIONED" => Some(Self::Provisioned),
            "PENDING" => Some(Self::Pending),
            "INSYNC" => Some(Self::InSync),
            _ => None,
        }
    }

    /// The API's status string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provisioned => "PROVISIONED",
            Self::Pending => "PENDING",
            Self::InSync => "INSYNC",
        }
    }
}

impl fmt::Display for ChangeTokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The pool a change token belongs to.
///
/// Global WAF (CloudFront) has one pool; WAF Regional has one per region.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum TokenScope {
    /// The global WAF endpoint.
    #[default]
    Global,
    /// A WAF Regional endpoint.
    Regional(String),
}

impl fmt::Display for TokenScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Regional(region) => f.write_str(region),
        }
    }
}
