use async_trait::async_trait;
use aws_sdk_waf::types as sdk;
use aws_sdk_waf::Client;

use super::{api_error, invalid_request, missing};
use crate::error::ApiError;
use crate::waf::{
    ChangeAction, ChangeToken, ChangeTokenStatus, FieldToMatch, Predicate, Rule, RuleUpdate,
    SizeConstraint, SizeConstraintSet, SizeConstraintUpdate, TokenScope, WafApi,
};

/// [`WafApi`] over the global WAF endpoint.
#[derive(Debug, Clone)]
pub struct SdkWaf {
    client: Client,
}

impl SdkWaf {
    /// Wrap a WAF client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn action(action: ChangeAction) -> sdk::ChangeAction {
    sdk::ChangeAction::from(action.as_str())
}

fn size_constraint_to_sdk(c: &SizeConstraint) -> Result<sdk::SizeConstraint, ApiError> {
    let field = sdk::FieldToMatch::builder()
        .r#type(sdk::MatchFieldType::from(c.field_to_match.field_type.as_str()))
        .set_data(c.field_to_match.data.clone())
        .build()
        .map_err(invalid_request)?;
    sdk::SizeConstraint::builder()
        .field_to_match(field)
        .comparison_operator(sdk::ComparisonOperator::from(c.comparison_operator.as_str()))
        .size(c.size)
        .text_transformation(sdk::TextTransformation::from(c.text_transformation.as_str()))
        .build()
        .map_err(invalid_request)
}

fn size_constraint_from_sdk(c: &sdk::SizeConstraint) -> Result<SizeConstraint, ApiError> {
    let field = c.field_to_match().ok_or_else(|| missing("FieldToMatch"))?;
    Ok(SizeConstraint {
        field_to_match: FieldToMatch {
            field_type: field.r#type().as_str().to_string(),
            data: field.data().map(str::to_string),
        },
        comparison_operator: c.comparison_operator().as_str().to_string(),
        size: c.size(),
        text_transformation: c.text_transformation().as_str().to_string(),
    })
}

fn set_from_sdk(set: &sdk::SizeConstraintSet) -> Result<SizeConstraintSet, ApiError> {
    Ok(SizeConstraintSet {
        id: set.size_constraint_set_id().to_string(),
        name: set.name().unwrap_or_default().to_string(),
        size_constraints: set
            .size_constraints()
            .iter()
            .map(size_constraint_from_sdk)
            .collect::<Result<_, _>>()?,
    })
}

fn rule_from_sdk(rule: &sdk::Rule) -> Rule {
    Rule {
        id: rule.rule_id().to_string(),
        name: rule.name().unwrap_or_default().to_string(),
        metric_name: rule.metric_name().unwrap_or_default().to_string(),
        predicates: rule
            .predicates()
            .iter()
            .map(|p| Predicate {
                negated: p.negated(),
                data_id: p.data_id().to_string(),
                predicate_type: p.r#type().as_str().to_string(),
            })
            .collect(),
    }
}

#[async_trait]
impl WafApi for SdkWaf {
    fn scope(&self) -> TokenScope {
        TokenScope::Global
    }

    async fn get_change_token(&self) -> Result<ChangeToken, ApiError> {
        let out = self.client.get_change_token().send().await.map_err(api_error)?;
        out.change_token()
            .map(ChangeToken::from)
            .ok_or_else(|| missing("ChangeToken"))
    }

    async fn get_change_token_status(
        &self,
        token: &ChangeToken,
    ) -> Result<ChangeTokenStatus, ApiError> {
        let out = self
            .client
            .get_change_token_status()
            .change_token(token.as_str())
            .send()
            .await
            .map_err(api_error)?;
        let status = out
            .change_token_status()
            .ok_or_else(|| missing("ChangeTokenStatus"))?;
        ChangeTokenStatus::parse(status.as_str()).ok_or_else(|| {
            ApiError::new("UnknownStatus", format!("change token status {}", status.as_str()))
        })
    }

    async fn create_size_constraint_set(
        &self,
        token: &ChangeToken,
        name: &str,
    ) -> Result<SizeConstraintSet, ApiError> {
        let out = self
            .client
            .create_size_constraint_set()
            .change_token(token.as_str())
            .name(name)
            .send()
            .await
            .map_err(api_error)?;
        set_from_sdk(out.size_constraint_set().ok_or_else(|| missing("SizeConstraintSet"))?)
    }

    async fn get_size_constraint_set(&self, id: &str) -> Result<SizeConstraintSet, ApiError> {
        let out = self
            .client
            .get_size_constraint_set()
            .size_constraint_set_id(id)
            .send()
            .await
            .map_err(api_error)?;
        set_from_sdk(out.size_constraint_set().ok_or_else(|| missing("SizeConstraintSet"))?)
    }

    async fn update_size_constraint_set(
        &self,
        token: &ChangeToken,
        id: &str,
        updates: &[SizeConstraintUpdate],
    ) -> Result<(), ApiError> {
        let updates = updates
            .iter()
            .map(|u| {
                sdk::SizeConstraintSetUpdate::builder()
                    .action(action(u.action))
                    .size_constraint(size_constraint_to_sdk(&u.constraint)?)
                    .build()
                    .map_err(invalid_request)
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.client
            .update_size_constraint_set()
            .change_token(token.as_str())
            .size_constraint_set_id(id)
            .set_updates(Some(updates))
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn delete_size_constraint_set(
        &self,
        token: &ChangeToken,
        id: &str,
    ) -> Result<(), ApiError> {
        self.client
            .delete_size_constraint_set()
            .change_token(token.as_str())
            .size_constraint_set_id(id)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn create_rule(
        &self,
        token: &ChangeToken,
        name: &str,
        metric_name: &str,
    ) -> Result<Rule, ApiError> {
        let out = self
            .client
            .create_rule()
            .change_token(token.as_str())
            .name(name)
            .metric_name(metric_name)
            .send()
            .await
            .map_err(api_error)?;
        out.rule().map(rule_from_sdk).ok_or_else(|| missing("Rule"))
    }

    async fn get_rule(&self, id: &str) -> Result<Rule, ApiError> {
        let out = self
            .client
            .get_rule()
            .rule_id(id)
            .send()
            .await
            .map_err(api_error)?;
        out.rule().map(rule_from_sdk).ok_or_else(|| missing("Rule"))
    }

    async fn update_rule(
        &self,
        token: &ChangeToken,
        id: &str,
        updates: &[RuleUpdate],
    ) -> Result<(), ApiError> {
        let updates = updates
            .iter()
            .map(|u| {
                let predicate = sdk::Predicate::builder()
                    .negated(u.predicate.negated)
                    .data_id(&u.predicate.data_id)
                    .r#type(sdk::PredicateType::from(u.predicate.predicate_type.as_str()))
                    .build()
                    .map_err(invalid_request)?;
                sdk::RuleUpdate::builder()
                    .action(action(u.action))
                    .predicate(predicate)
                    .build()
                    .map_err(invalid_request)
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.client
            .update_rule()
            .change_token(token.as_str())
            .rule_id(id)
            .set_updates(Some(updates))
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn delete_rule(&self, token: &ChangeToken, id: &str) -> Result<(), ApiError> {
        self.client
            .delete_rule()
            .change_token(token.as_str())
            .rule_id(id)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }
}
