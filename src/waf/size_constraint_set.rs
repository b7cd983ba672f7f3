//! `aws_waf_size_constraint_set`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::api::{ChangeAction, FieldToMatch, SizeConstraint, SizeConstraintSet, SizeConstraintUpdate, WafApi};
use super::retryer::WafRetryer;
use crate::error::ProviderError;
use crate::resource::{
    decode, encode, null_as_default, set_changes, undo_create, ProviderContext, Resource,
};
use crate::schema::{Attribute, Block, NestedBlock, Schema};

const FIELD_TYPES: [&str; 7] = [
    "URI",
    "QUERY_STRING",
    "HEADER",
    "METHOD",
    "BODY",
    "SINGLE_QUERY_ARG",
    "ALL_QUERY_ARGS",
];

const COMPARISON_OPERATORS: [&str; 6] = ["EQ", "NE", "LE", "LT", "GE", "GT"];

const TEXT_TRANSFORMATIONS: [&str; 6] = [
    "NONE",
    "COMPRESS_WHITE_SPACE",
    "HTML_ENTITY_DECODE",
    "LOWERCASE",
    "CMD_LINE",
    "URL_DECODE",
];

/// Largest size WAF accepts, in bytes.
const MAX_SIZE: i64 = 21_474_836_480;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SizeConstraintSetState {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    size_constraints: Vec<SizeConstraintBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SizeConstraintBlock {
    #[serde(default, deserialize_with = "null_as_default")]
    field_to_match: Vec<FieldToMatch>,
    comparison_operator: String,
    size: i64,
    text_transformation: String,
}

impl SizeConstraintBlock {
    fn to_constraint(&self) -> Result<SizeConstraint, ProviderError> {
        let field_to_match = match self.field_to_match.as_slice() {
            [field] => field.clone(),
            other => {
                return Err(ProviderError::Validation(format!(
                    "size constraint needs exactly one field_to_match, got {}",
                    other.len()
                )))
            },
        };
        Ok(SizeConstraint {
            field_to_match,
            comparison_operator: self.comparison_operator.clone(),
            size: self.size,
            text_transformation: self.text_transformation.clone(),
        })
    }
}

impl From<&SizeConstraint> for SizeConstraintBlock {
    fn from(c: &SizeConstraint) -> Self {
        Self {
            field_to_match: vec![c.field_to_match.clone()],
            comparison_operator: c.comparison_operator.clone(),
            size: c.size,
            text_transformation: c.text_transformation.clone(),
        }
    }
}

impl SizeConstraintSetState {
    fn constraints(&self) -> Result<Vec<SizeConstraint>, ProviderError> {
        self.size_constraints
            .iter()
            .map(SizeConstraintBlock::to_constraint)
            .collect()
    }

    fn id(&self) -> Result<&str, ProviderError> {
        self.id
            .as_deref()
            .ok_or_else(|| ProviderError::Validation("size constraint set state has no id".into()))
    }
}

impl From<SizeConstraintSet> for SizeConstraintSetState {
    fn from(set: SizeConstraintSet) -> Self {
        Self {
            id: Some(set.id),
            name: set.name,
            size_constraints: set.size_constraints.iter().map(Into::into).collect(),
        }
    }
}

fn updates(action: ChangeAction, constraints: Vec<SizeConstraint>) -> Vec<SizeConstraintUpdate> {
    constraints
        .into_iter()
        .map(|constraint| SizeConstraintUpdate { action, constraint })
        .collect()
}

/// Manages a WAF SizeConstraintSet and its constraints.
#[derive(Debug, Default, Clone, Copy)]
pub struct SizeConstraintSetResource;

impl SizeConstraintSetResource {
    /// Resource type name.
    pub const TYPE_NAME: &'static str = "aws_waf_size_constraint_set";

    async fn apply_updates(
        retryer: &WafRetryer<'_>,
        waf: &dyn WafApi,
        id: &str,
        updates: &[SizeConstraintUpdate],
    ) -> Result<(), super::WafError> {
        if updates.is_empty() {
            return Ok(());
        }
        retryer
            .retry_with_token(|token| async move {
                waf.update_size_constraint_set(&token, id, updates).await
            })
            .await
    }

    async fn fetch(waf: &dyn WafApi, id: &str) -> Result<Option<SizeConstraintSetState>, ProviderError> {
        match waf.get_size_constraint_set(id).await {
            Ok(set) => Ok(Some(set.into())),
            Err(e) if e.is_not_found() => {
                warn!(id, "WAF SizeConstraintSet not found, removing from state");
                Ok(None)
            },
            Err(e) => Err(ProviderError::from(e).with_context("reading WAF SizeConstraintSet")),
        }
    }
}

#[async_trait]
impl Resource for SizeConstraintSetResource {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn schema(&self) -> Schema {
        let field_to_match = Block::new()
            .with_attribute(
                "type",
                Attribute::required_string().with_allowed_values(FIELD_TYPES),
            )
            .with_attribute(
                "data",
                Attribute::optional_string().with_description("Header or query argument name"),
            );

        let constraint = Block::new()
            .with_block(
                "field_to_match",
                NestedBlock::set(field_to_match)
                    .with_min_items(1)
                    .with_max_items(1),
            )
            .with_attribute(
                "comparison_operator",
                Attribute::required_string().with_allowed_values(COMPARISON_OPERATORS),
            )
            .with_attribute(
                "size",
                Attribute::required_int64()
                    .with_int_range(0, MAX_SIZE)
                    .with_description("Size in bytes"),
            )
            .with_attribute(
                "text_transformation",
                Attribute::required_string().with_allowed_values(TEXT_TRANSFORMATIONS),
            );

        Schema::v0()
            .with_attribute(
                "name",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("Name of the set"),
            )
            .with_block(
                "size_constraints",
                NestedBlock::set(constraint).with_min_items(1),
            )
            .with_attribute("id", Attribute::computed_string())
    }

    async fn create(&self, ctx: &ProviderContext, planned: Value) -> Result<Value, ProviderError> {
        let state: SizeConstraintSetState = decode(planned, Self::TYPE_NAME)?;
        let desired = state.constraints()?;
        let waf = ctx.clients.waf.as_ref();
        let retryer = WafRetryer::new(waf, &ctx.config.waf);

        info!(name = %state.name, "Creating WAF SizeConstraintSet");
        let name = state.name.as_str();
        let (token, set) = retryer
            .mutate(|token| async move { waf.create_size_constraint_set(&token, name).await })
            .await
            .map_err(|e| ProviderError::from(e).with_context("creating WAF SizeConstraintSet"))?;
        let id = set.id.as_str();

        let finish = async {
            retryer
                .wait_for_sync(&token)
                .await
                .map_err(|e| ProviderError::from(e).with_context("creating WAF SizeConstraintSet"))?;

            let inserts = updates(ChangeAction::Insert, desired);
            Self::apply_updates(&retryer, waf, id, &inserts)
                .await
                .map_err(|e| ProviderError::from(e).with_context("updating WAF SizeConstraintSet"))?;
            info!(id, constraints = inserts.len(), "Created WAF SizeConstraintSet");

            let created = Self::fetch(waf, id).await?.ok_or_else(|| {
                ProviderError::NotFound(format!("WAF SizeConstraintSet {} vanished after create", id))
            })?;
            encode(&created)
        };

        match finish.await {
            Ok(created) => Ok(created),
            Err(err) => {
                let partial = encode(&SizeConstraintSetState::from(set.clone()))?;
                Err(undo_create(self, ctx, partial, err).await)
            },
        }
    }

    async fn read(&self, ctx: &ProviderContext, current: Value) -> Result<Option<Value>, ProviderError> {
        let state: SizeConstraintSetState = decode(current, Self::TYPE_NAME)?;
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
        let prior: SizeConstraintSetState = decode(prior, Self::TYPE_NAME)?;
        let planned: SizeConstraintSetState = decode(planned, Self::TYPE_NAME)?;
        let id = prior.id()?;
        let waf = ctx.clients.waf.as_ref();
        let retryer = WafRetryer::new(waf, &ctx.config.waf);

        let (removed, added) = set_changes(&prior.constraints()?, &planned.constraints()?);
        info!(id, removed = removed.len(), added = added.len(), "Updating WAF SizeConstraintSet");

        let mut changes = updates(ChangeAction::Delete, removed);
        changes.extend(updates(ChangeAction::Insert, added));
        Self::apply_updates(&retryer, waf, id, &changes)
            .await
            .map_err(|e| ProviderError::from(e).with_context("updating WAF SizeConstraintSet"))?;

        let updated = Self::fetch(waf, id)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("WAF SizeConstraintSet {}", id)))?;
        encode(&updated)
    }

    async fn delete(&self, ctx: &ProviderContext, current: Value) -> Result<(), ProviderError> {
        let state: SizeConstraintSetState = decode(current, Self::TYPE_NAME)?;
        let id = state.id()?;
        let waf = ctx.clients.waf.as_ref();
        let retryer = WafRetryer::new(waf, &ctx.config.waf);

        // Constraints must be removed before the set itself can go.
        let Some(remote) = Self::fetch(waf, id).await? else {
            return Ok(());
        };
        let deletes = updates(ChangeAction::Delete, remote.constraints()?);
        match Self::apply_updates(&retryer, waf, id, &deletes).await {
            Ok(()) => {},
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => {
                return Err(ProviderError::from(e).with_context("deleting WAF SizeConstraintSet"))
            },
        }

        info!(id, "Deleting WAF SizeConstraintSet");
        match retryer
            .retry_with_token(|token| async move { waf.delete_size_constraint_set(&token, id).await })
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(ProviderError::from(e).with_context("deleting WAF SizeConstraintSet")),
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
    use crate::testing::{fast_config, FakeClients};
    use crate::validation::validate;
    use serde_json::json;

    fn config(constraints: Value) -> Value {
        json!({"name": "large-bodies", "size_constraints": constraints})
    }

    fn body_gt(size: i64) -> Value {
        json!({
            "field_to_match": [{"type": "BODY"}],
            "comparison_operator": "GT",
            "size": size,
            "text_transformation": "NONE"
        })
    }

    fn ctx(fakes: &FakeClients) -> ProviderContext {
        ProviderContext {
            config: fast_config(),
            clients: fakes.clients(),
        }
    }

    #[test]
    fn test_schema_validation() {
        let schema = SizeConstraintSetResource.schema();
        assert!(validate(&schema, &config(json!([body_gt(4096)]))).is_empty());

        let diagnostics = validate(&schema, &config(json!([])));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("size_constraints"));

        let mut bad = body_gt(MAX_SIZE + 1);
        bad["comparison_operator"] = json!("BETWEEN");
        bad["field_to_match"] = json!([{"type": "COOKIE"}]);
        let diagnostics = validate(&schema, &config(json!([bad])));
        assert_eq!(diagnostics.len(), 3);

        let two_fields = json!({
            "field_to_match": [{"type": "BODY"}, {"type": "URI"}],
            "comparison_operator": "GT",
            "size": 1,
            "text_transformation": "NONE"
        });
        assert_eq!(validate(&schema, &config(json!([two_fields]))).len(), 1);
    }

    #[tokio::test]
    async fn test_create_inserts_constraints() {
        let fakes = FakeClients::new();
        let ctx = ctx(&fakes);
        let header = json!({
            "field_to_match": [{"type": "HEADER", "data": "referer"}],
            "comparison_operator": "LE",
            "size": 64,
            "text_transformation": "LOWERCASE"
        });

        let state = SizeConstraintSetResource
            .create(&ctx, config(json!([body_gt(4096), header])))
            .await
            .unwrap();

        let id = state["id"].as_str().unwrap();
        let remote = fakes.waf.size_constraint_set(id).unwrap();
        assert_eq!(remote.name, "large-bodies");
        assert_eq!(remote.size_constraints.len(), 2);
        assert_eq!(state["size_constraints"].as_array().unwrap().len(), 2);
        // One token for the create, one for the insert.
        assert_eq!(fakes.waf.token_fetches(), 2);
    }

    #[tokio::test]
    async fn test_update_diffs_constraints_in_one_call() {
        let fakes = FakeClients::new();
        let ctx = ctx(&fakes);
        let prior = SizeConstraintSetResource
            .create(&ctx, config(json!([body_gt(4096), body_gt(8192)])))
            .await
            .unwrap();
        let fetches_before = fakes.waf.token_fetches();

        let mut planned = config(json!([body_gt(8192), body_gt(16384)]));
        planned["id"] = prior["id"].clone();
        let updated = SizeConstraintSetResource
            .update(&ctx, prior.clone(), planned)
            .await
            .unwrap();

        let sizes: Vec<i64> = fakes
            .waf
            .size_constraint_set(prior["id"].as_str().unwrap())
            .unwrap()
            .size_constraints
            .iter()
            .map(|c| c.size)
            .collect();
        assert_eq!(sizes.len(), 2);
        assert!(sizes.contains(&8192));
        assert!(sizes.contains(&16384));
        assert_eq!(updated["size_constraints"].as_array().unwrap().len(), 2);
        assert_eq!(fakes.waf.token_fetches() - fetches_before, 1);
    }

    #[tokio::test]
    async fn test_read_clears_missing_set() {
        let fakes = FakeClients::new();
        let ctx = ctx(&fakes);
        let state = SizeConstraintSetResource
            .create(&ctx, config(json!([body_gt(1)])))
            .await
            .unwrap();

        assert!(SizeConstraintSetResource.read(&ctx, state.clone()).await.unwrap().is_some());

        fakes.waf.remove_size_constraint_set(state["id"].as_str().unwrap());
        assert!(SizeConstraintSetResource.read(&ctx, state).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_empties_then_removes() {
        let fakes = FakeClients::new();
        let ctx = ctx(&fakes);
        let state = SizeConstraintSetResource
            .create(&ctx, config(json!([body_gt(1), body_gt(2)])))
            .await
            .unwrap();
        let id = state["id"].as_str().unwrap().to_string();

        SizeConstraintSetResource.delete(&ctx, state.clone()).await.unwrap();
        assert!(fakes.waf.size_constraint_set(&id).is_none());

        // Deleting again is a no-op.
        SizeConstraintSetResource.delete(&ctx, state).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_retries_stale_token() {
        let fakes = FakeClients::new();
        fakes.waf.inject_failure("CreateSizeConstraintSet", crate::error::ApiError::token_conflict());
        let ctx = ctx(&fakes);

        let state = SizeConstraintSetResource
            .create(&ctx, config(json!([body_gt(1)])))
            .await
            .unwrap();

        assert!(state["id"].is_string());
        assert_eq!(fakes.waf.token_fetches(), 3);
    }

    #[tokio::test]
    async fn test_import() {
        let fakes = FakeClients::new();
        let ctx = ctx(&fakes);
        let state = SizeConstraintSetResource
            .create(&ctx, config(json!([body_gt(1)])))
            .await
            .unwrap();

        let imported = SizeConstraintSetResource
            .import(&ctx, state["id"].as_str().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(imported["name"], "large-bodies");
        assert!(SizeConstraintSetResource.import(&ctx, "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_insert_removes_new_set() {
        let fakes = FakeClients::new();
        fakes.waf.inject_failure(
            "UpdateSizeConstraintSet",
            crate::error::ApiError::validation("WAFInvalidParameterException", "bad size"),
        );
        let ctx = ctx(&fakes);

        let err = SizeConstraintSetResource
            .create(&ctx, config(json!([body_gt(1)])))
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Validation(_)));
        assert!(err.message().contains("updating WAF SizeConstraintSet"));
        assert_eq!(fakes.waf.size_constraint_set_count(), 0);
    }
}
