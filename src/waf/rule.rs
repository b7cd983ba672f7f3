//! `aws_waf_rule`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::api::{ChangeAction, Predicate, Rule, RuleUpdate, WafApi};
use super::retryer::{WafError, WafRetryer};
use crate::error::ProviderError;
use crate::resource::{
    decode, encode, null_as_default, set_changes, undo_create, ProviderContext, Resource,
};
use crate::schema::{Attribute, Block, Diagnostic, NestedBlock, Schema};
use crate::validation::validate;

const PREDICATE_TYPES: [&str; 7] = [
    "IPMatch",
    "ByteMatch",
    "SqlInjectionMatch",
    "GeoMatch",
    "SizeConstraint",
    "XssMatch",
    "RegexMatch",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RuleState {
    #[serde(default)]
    id: Option<String>,
    name: String,
    metric_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    predicates: Vec<PredicateBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PredicateBlock {
    #[serde(default)]
    negated: bool,
    data_id: String,
    #[serde(rename = "type")]
    predicate_type: String,
}

impl From<&PredicateBlock> for Predicate {
    fn from(p: &PredicateBlock) -> Self {
        Self {
            negated: p.negated,
            data_id: p.data_id.clone(),
            predicate_type: p.predicate_type.clone(),
        }
    }
}

impl From<&Predicate> for PredicateBlock {
    fn from(p: &Predicate) -> Self {
        Self {
            negated: p.negated,
            data_id: p.data_id.clone(),
            predicate_type: p.predicate_type.clone(),
        }
    }
}

impl From<Rule> for RuleState {
    fn from(rule: Rule) -> Self {
        Self {
            id: Some(rule.id),
            name: rule.name,
            metric_name: rule.metric_name,
            predicates: rule.predicates.iter().map(Into::into).collect(),
        }
    }
}

impl RuleState {
    fn predicates(&self) -> Vec<Predicate> {
        self.predicates.iter().map(Into::into).collect()
    }

    fn id(&self) -> Result<&str, ProviderError> {
        self.id
            .as_deref()
            .ok_or_else(|| ProviderError::Validation("WAF rule state has no id".into()))
    }
}

fn updates(action: ChangeAction, predicates: Vec<Predicate>) -> Vec<RuleUpdate> {
    predicates
        .into_iter()
        .map(|predicate| RuleUpdate { action, predicate })
        .collect()
}

/// Manages a WAF rule and the predicates attached to it.
#[derive(Debug, Default, Clone, Copy)]
pub struct WafRuleResource;

impl WafRuleResource {
    /// Resource type name.
    pub const TYPE_NAME: &'static str = "aws_waf_rule";

    async fn apply_updates(
        retryer: &WafRetryer<'_>,
        waf: &dyn WafApi,
        id: &str,
        updates: &[RuleUpdate],
    ) -> Result<(), WafError> {
        if updates.is_empty() {
            return Ok(());
        }
        retryer
            .retry_with_token(|token| async move { waf.update_rule(&token, id, updates).await })
            .await
    }

    async fn fetch(waf: &dyn WafApi, id: &str) -> Result<Option<RuleState>, ProviderError> {
        match waf.get_rule(id).await {
            Ok(rule) => Ok(Some(rule.into())),
            Err(e) if e.is_not_found() => {
                warn!(id, "WAF Rule not found, removing from state");
                Ok(None)
            },
            Err(e) => Err(ProviderError::from(e).with_context("reading WAF Rule")),
        }
    }
}

fn is_metric_name(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric())
}

#[async_trait]
impl Resource for WafRuleResource {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn schema(&self) -> Schema {
        let predicate = Block::new()
            .with_attribute("negated", Attribute::required_bool())
            .with_attribute(
                "data_id",
                Attribute::required_string()
                    .with_max_length(128)
                    .with_description("ID of the referenced match set"),
            )
            .with_attribute(
                "type",
                Attribute::required_string().with_allowed_values(PREDICATE_TYPES),
            );

        Schema::v0()
            .with_attribute("name", Attribute::required_string().with_force_new())
            .with_attribute(
                "metric_name",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("Alphanumeric CloudWatch metric name"),
            )
            .with_block("predicates", NestedBlock::set(predicate))
            .with_attribute("id", Attribute::computed_string())
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let mut diagnostics = validate(&self.schema(), config);
        if let Some(metric_name) = config.get("metric_name").and_then(Value::as_str) {
            if !is_metric_name(metric_name) {
                diagnostics.push(
                    Diagnostic::error("Invalid metric name")
                        .with_detail(format!(
                            "Only alphanumeric characters allowed in \"metric_name\": {:?}",
                            metric_name
                        ))
                        .with_attribute("metric_name"),
                );
            }
        }
        diagnostics
    }

    async fn create(&self, ctx: &ProviderContext, planned: Value) -> Result<Value, ProviderError> {
        let state: RuleState = decode(planned, Self::TYPE_NAME)?;
        let waf = ctx.clients.waf.as_ref();
        let retryer = WafRetryer::new(waf, &ctx.config.waf);

        info!(name = %state.name, "Creating WAF Rule");
        let name = state.name.as_str();
        let metric_name = state.metric_name.as_str();
        let (token, rule) = retryer
            .mutate(|token| async move { waf.create_rule(&token, name, metric_name).await })
            .await
            .map_err(|e| ProviderError::from(e).with_context("creating WAF Rule"))?;
        let id = rule.id.as_str();

        let finish = async {
            retryer
                .wait_for_sync(&token)
                .await
                .map_err(|e| ProviderError::from(e).with_context("creating WAF Rule"))?;

            let inserts = updates(ChangeAction::Insert, state.predicates());
            Self::apply_updates(&retryer, waf, id, &inserts)
                .await
                .map_err(|e| ProviderError::from(e).with_context("updating WAF Rule"))?;
            info!(id, predicates = inserts.len(), "Created WAF Rule");

            let created = Self::fetch(waf, id)
                .await?
                .ok_or_else(|| ProviderError::NotFound(format!("WAF Rule {} vanished after create", id)))?;
            encode(&created)
        };

        match finish.await {
            Ok(created) => Ok(created),
            Err(err) => {
                let partial = encode(&RuleState::from(rule.clone()))?;
                Err(undo_create(self, ctx, partial, err).await)
            },
        }
    }

    async fn read(&self, ctx: &ProviderContext, current: Value) -> Result<Option<Value>, ProviderError> {
        let state: RuleState = decode(current, Self::TYPE_NAME)?;
        let Some(id) = state.id.as_deref() else {
            return Ok(None);
        };
        match Self::fetch(ctx.clients.waf.as_ref(), id).await? {
            Some(fresh) => Ok(Some(encode(&fresh)?)),
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        ctx: &ProviderContext,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let prior: RuleState = decode(prior, Self::TYPE_NAME)?;
        let planned: RuleState = decode(planned, Self::TYPE_NAME)?;
        let id = prior.id()?;
        let waf = ctx.clients.waf.as_ref();
        let retryer = WafRetryer::new(waf, &ctx.config.waf);

        let (removed, added) = set_changes(&prior.predicates(), &planned.predicates());
        info!(id, removed = removed.len(), added = added.len(), "Updating WAF Rule");

        let mut changes = updates(ChangeAction::Delete, removed);
        changes.extend(updates(ChangeAction::Insert, added));
        Self::apply_updates(&retryer, waf, id, &changes)
            .await
            .map_err(|e| ProviderError::from(e).with_context("updating WAF Rule"))?;

        let updated = Self::fetch(waf, id)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("WAF Rule {}", id)))?;
        encode(&updated)
    }

    async fn delete(&self, ctx: &ProviderContext, current: Value) -> Result<(), ProviderError> {
        let state: RuleState = decode(current, Self::TYPE_NAME)?;
        let id = state.id()?;
        let waf = ctx.clients.waf.as_ref();
        let retryer = WafRetryer::new(waf, &ctx.config.waf);

        // A rule must be emptied before it can be deleted.
        let Some(remote) = Self::fetch(waf, id).await? else {
            return Ok(());
        };
        let deletes = updates(ChangeAction::Delete, remote.predicates());
        match Self::apply_updates(&retryer, waf, id, &deletes).await {
            Ok(()) => {},
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(ProviderError::from(e).with_context("removing WAF Rule predicates")),
        }

        info!(id, "Deleting WAF Rule");
        match retryer
            .retry_with_token(|token| async move { waf.delete_rule(&token, id).await })
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(ProviderError::from(e).with_context("deleting WAF Rule")),
        }
    }

    async fn import(&self, ctx: &ProviderContext, id: &str) -> Result<Option<Value>, ProviderError> {
        match Self::fetch(ctx.clients.waf.as_ref(), id).await? {
            Some(state) => Ok(Some(encode(&state)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::diff;
    use crate::testing::{fast_config, FakeClients};
    use serde_json::json;

    fn rule_config(name: &str, data_id: &str) -> Value {
        json!({
            "name": name,
            "metric_name": name,
            "predicates": [{"data_id": data_id, "negated": false, "type": "IPMatch"}]
        })
    }

    fn ctx(fakes: &FakeClients) -> ProviderContext {
        ProviderContext {
            config: fast_config(),
            clients: fakes.clients(),
        }
    }

    #[test]
    fn test_metric_name_validation() {
        assert!(WafRuleResource.validate(&rule_config("wafrule1", "ipset")).is_empty());

        let mut config = rule_config("wafrule1", "ipset");
        config["metric_name"] = json!("waf-rule");
        let diagnostics = WafRuleResource.validate(&config);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("metric_name"));

        assert!(!is_metric_name(""));
        assert!(is_metric_name("Rule42"));
    }

    #[test]
    fn test_predicate_validation() {
        let config = json!({
            "name": "r",
            "metric_name": "r",
            "predicates": [{"data_id": "x".repeat(129), "negated": false, "type": "CookieMatch"}]
        });
        assert_eq!(WafRuleResource.validate(&config).len(), 2);
    }

    #[tokio::test]
    async fn test_basic() {
        let fakes = FakeClients::new();
        let ctx = ctx(&fakes);

        let state = WafRuleResource
            .create(&ctx, rule_config("wafruleabcde", "ipset-1"))
            .await
            .unwrap();

        assert_eq!(state["name"], "wafruleabcde");
        assert_eq!(state["metric_name"], "wafruleabcde");
        assert_eq!(state["predicates"].as_array().unwrap().len(), 1);

        let rule = fakes.waf.rule(state["id"].as_str().unwrap()).unwrap();
        assert_eq!(rule.predicates[0].predicate_type, "IPMatch");
        assert!(!rule.predicates[0].negated);

        WafRuleResource.delete(&ctx, state.clone()).await.unwrap();
        assert!(fakes.waf.rule(state["id"].as_str().unwrap()).is_none());
    }

    #[tokio::test]
    async fn test_change_name_forces_new() {
        let fakes = FakeClients::new();
        let ctx = ctx(&fakes);
        let resource = WafRuleResource;

        let before = resource
            .create(&ctx, rule_config("wafruleabcde", "ipset-1"))
            .await
            .unwrap();

        let proposed = rule_config("wafrulenewfghij", "ipset-1");
        let plan = diff(&resource.schema(), Some(&before), &proposed, |_, _, _| false);
        assert!(plan.requires_replace);
        assert!(plan.planned_state["id"].is_null());

        resource.delete(&ctx, before.clone()).await.unwrap();
        let after = resource.create(&ctx, plan.planned_state).await.unwrap();

        assert_ne!(before["id"], after["id"]);
        assert_eq!(after["name"], "wafrulenewfghij");
        assert_eq!(after["metric_name"], "wafrulenewfghij");
        assert_eq!(after["predicates"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_swaps_predicates() {
        let fakes = FakeClients::new();
        let ctx = ctx(&fakes);

        let prior = WafRuleResource
            .create(&ctx, rule_config("wafrule", "ipset-1"))
            .await
            .unwrap();
        let mut planned = rule_config("wafrule", "ipset-2");
        planned["id"] = prior["id"].clone();

        let updated = WafRuleResource.update(&ctx, prior, planned).await.unwrap();
        assert_eq!(updated["predicates"][0]["data_id"], "ipset-2");
        assert_eq!(updated["predicates"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_disappears() {
        let fakes = FakeClients::new();
        let ctx = ctx(&fakes);
        let state = WafRuleResource
            .create(&ctx, rule_config("wafrule", "ipset-1"))
            .await
            .unwrap();
        let id = state["id"].as_str().unwrap().to_string();

        // Remove the rule behind the provider's back.
        let waf = fakes.waf.as_ref();
        let retryer = WafRetryer::new(waf, &ctx.config.waf);
        let rule = waf.rule(&id).unwrap();
        let deletes = updates(ChangeAction::Delete, rule.predicates);
        let id_ref = id.as_str();
        let deletes_ref = deletes.as_slice();
        retryer
            .retry_with_token(|token| async move { waf.update_rule(&token, id_ref, deletes_ref).await })
            .await
            .unwrap();
        retryer
            .retry_with_token(|token| async move { waf.delete_rule(&token, id_ref).await })
            .await
            .unwrap();

        assert!(WafRuleResource.read(&ctx, state.clone()).await.unwrap().is_none());
        // Deleting something already gone succeeds.
        WafRuleResource.delete(&ctx, state).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_referenced_rule_fails() {
        let fakes = FakeClients::new();
        let ctx = ctx(&fakes);
        let state = WafRuleResource
            .create(&ctx, rule_config("wafrule", "ipset-1"))
            .await
            .unwrap();
        fakes.waf.inject_failure(
            "DeleteRule",
            crate::error::ApiError::validation("WAFReferencedItemException", "rule is in use"),
        );

        let err = WafRuleResource.delete(&ctx, state).await.unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
        assert!(err.message().contains("deleting WAF Rule"));
    }

    #[tokio::test]
    async fn test_failed_insert_removes_new_rule() {
        let fakes = FakeClients::new();
        fakes.waf.inject_failure(
            "UpdateRule",
            crate::error::ApiError::validation("WAFNonexistentContainerException", "no such IPSet"),
        );
        let ctx = ctx(&fakes);

        let err = WafRuleResource
            .create(&ctx, rule_config("wafrule", "ipset-1"))
            .await
            .unwrap_err();

        assert!(err.message().contains("updating WAF Rule"));
        assert_eq!(fakes.waf.rule_count(), 0);
    }

    #[tokio::test]
    async fn test_create_sync_timeout_removes_new_rule() {
        let fakes = FakeClients::new();
        fakes.waf.set_sync_delay(u32::MAX);
        let mut ctx = ctx(&fakes);
        ctx.config.waf.sync_timeout_secs = Some(0);

        let err = WafRuleResource
            .create(&ctx, rule_config("wafrule", "ipset-1"))
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::DeadlineExceeded(_)));
        assert!(err.message().starts_with("creating WAF Rule"));
        assert_eq!(fakes.waf.rule_count(), 0);
    }
}
