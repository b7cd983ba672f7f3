//! The WAF control-plane operations the resources need.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::token::{ChangeToken, ChangeTokenStatus, TokenScope};
use crate::error::ApiError;

/// Part of a web request a size constraint inspects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldToMatch {
    /// `URI`, `QUERY_STRING`, `HEADER`, `METHOD`, `BODY`, ...
    #[serde(rename = "type")]
    pub field_type: String,
    /// Header or query argument name, when the type needs one.
    #[serde(default)]
    pub data: Option<String>,
}

/// A single size comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SizeConstraint {
    /// What to measure.
    pub field_to_match: FieldToMatch,
    /// `EQ`, `NE`, `LE`, `LT`, `GE` or `GT`.
    pub comparison_operator: String,
    /// Size in bytes.
    pub size: i64,
    /// Transformation applied before measuring.
    pub text_transformation: String,
}

/// A named collection of size constraints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeConstraintSet {
    /// Identifier assigned by WAF.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Current constraints.
    pub size_constraints: Vec<SizeConstraint>,
}

/// A condition referenced by a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Predicate {
    /// Match when the condition does *not* hold.
    pub negated: bool,
    /// ID of the referenced match set.
    pub data_id: String,
    /// Kind of match set, e.g. `IPMatch`.
    pub predicate_type: String,
}

/// A WAF rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Identifier assigned by WAF.
    pub id: String,
    /// Display name.
    pub name: String,
    /// CloudWatch metric name.
    pub metric_name: String,
    /// Current predicates.
    pub predicates: Vec<Predicate>,
}

/// Whether an update adds or removes an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeAction {
    /// Add the element.
    Insert,
    /// Remove the element.
    Delete,
}

impl ChangeAction {
    /// The API's action string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Delete => "DELETE",
        }
    }
}

/// One element of an `UpdateSizeConstraintSet` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeConstraintUpdate {
    /// Insert or delete.
    pub action: ChangeAction,
    /// The constraint affected.
    pub constraint: SizeConstraint,
}

/// One element of an `UpdateRule` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleUpdate {
    /// Insert or delete.
    pub action: ChangeAction,
    /// The predicate affected.
    pub predicate: Predicate,
}

/// WAF control-plane client for one change-token scope.
///
/// Every mutating call takes a [`ChangeToken`]; use
/// [`WafRetryer`](super::WafRetryer) to obtain one and to retry on conflicts.
#[async_trait]
pub trait WafApi: Send + Sync {
    /// The change-token pool this endpoint issues tokens from.
    fn scope(&self) -> TokenScope;

    /// Issue a change token. An unused token is handed out again until consumed.
    async fn get_change_token(&self) -> Result<ChangeToken, ApiError>;

    /// Status of a previously issued token.
    async fn get_change_token_status(
        &self,
        token: &ChangeToken,
    ) -> Result<ChangeTokenStatus, ApiError>;

    /// Create an empty size constraint set.
    async fn create_size_constraint_set(
        &self,
        token: &ChangeToken,
        name: &str,
    ) -> Result<SizeConstraintSet, ApiError>;

    /// Fetch a size constraint set.
    async fn get_size_constraint_set(&self, id: &str) -> Result<SizeConstraintSet, ApiError>;

    /// Insert and delete constraints in one request.
    async fn update_size_constraint_set(
        &self,
        token: &ChangeToken,
        id: &str,
        updates: &[SizeConstraintUpdate],
    ) -> Result<(), ApiError>;

    /// Delete an empty size constraint set.
    async fn delete_size_constraint_set(&self, token: &ChangeToken, id: &str)
        -> Result<(), ApiError>;

    /// Create a rule with no predicates.
    async fn create_rule(
        &self,
        token: &ChangeToken,
        name: &str,
        metric_name: &str,
    ) -> Result<Rule, ApiError>;

    /// Fetch a rule.
    async fn get_rule(&self, id: &str) -> Result<Rule, ApiError>;

    /// Insert and delete predicates in one request.
    async fn update_rule(
        &self,
        token: &ChangeToken,
        id: &str,
        updates: &[RuleUpdate],
    ) -> Result<(), ApiError>;

    /// Delete a rule with no predicates.
    async fn delete_rule(&self, token: &ChangeToken, id: &str) -> Result<(), ApiError>;
}
