//! AWS WAF (classic) resources and the change-token retrier they share.

mod api;
mod retryer;
mod rule;
mod size_constraint_set;
mod token;

pub use api::{
    ChangeAction, FieldToMatch, Predicate, Rule, RuleUpdate, SizeConstraint, SizeConstraintSet,
    SizeConstraintUpdate, WafApi,
};
pub use retryer::{WafError, WafRetryer};
pub use rule::WafRuleResource;
pub use size_constraint_set::SizeConstraintSetResource;
pub use token::{ChangeToken, ChangeTokenStatus, TokenScope};
