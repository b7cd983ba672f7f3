//! `aws_sns_topic`.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::api::{SnsApi, DELIVERY_POLICY, DISPLAY_NAME, POLICY};
use super::policy::policies_equivalent;
use crate::config::SnsSettings;
use crate::error::{ApiError, ApiErrorKind, ProviderError};
use crate::resource::{decode, encode, undo_create, ProviderContext, Resource};
use crate::retry::retry_with_backoff;
use crate::schema::{Attribute, Diagnostic, Schema};
use crate::validation::validate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TopicState {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    policy: Option<String>,
    #[serde(default)]
    delivery_policy: Option<String>,
    #[serde(default)]
    arn: Option<String>,
}

impl TopicState {
    fn arn(&self) -> Result<&str, ProviderError> {
        self.arn
            .as_deref()
            .or(self.id.as_deref())
            .ok_or_else(|| ProviderError::Validation("SNS topic state has no ARN".into()))
    }

    /// Build state from remote attributes, keeping `prior` policy text
    /// when AWS only reformatted it.
    fn from_remote(arn: &str, attrs: &HashMap<String, String>, prior: Option<&TopicState>) -> Self {
        let non_empty = |key: &str| attrs.get(key).filter(|v| !v.is_empty()).cloned();
        let keep_prior = |remote: Option<String>, prior: Option<&String>| -> Option<String> {
            match (remote, prior) {
                (Some(remote), Some(prior)) if policies_equivalent(&remote, prior) => {
                    Some(prior.clone())
                },
                (remote, _) => remote,
            }
        };

        Self {
            id: Some(arn.to_string()),
            name: arn.rsplit(':').next().unwrap_or(arn).to_string(),
            display_name: non_empty(DISPLAY_NAME),
            policy: keep_prior(non_empty(POLICY), prior.and_then(|p| p.policy.as_ref())),
            delivery_policy: keep_prior(
                non_empty(DELIVERY_POLICY),
                prior.and_then(|p| p.delivery_policy.as_ref()),
            ),
            arn: Some(arn.to_string()),
        }
    }
}

/// Whether a rejected policy names an IAM principal that is not visible yet.
fn is_principal_propagation(err: &ApiError) -> bool {
    err.kind == ApiErrorKind::Validation
        && err.code.starts_with("InvalidParameter")
        && err.message.contains("Principal")
}

/// Topic attribute writes for one ARN.
struct Topic<'a> {
    api: &'a dyn SnsApi,
    settings: &'a SnsSettings,
    arn: &'a str,
}

impl<'a> Topic<'a> {
    fn new(ctx: &'a ProviderContext, arn: &'a str) -> Self {
        Self {
            api: ctx.clients.sns.as_ref(),
            settings: &ctx.config.sns,
            arn,
        }
    }

    async fn set(&self, name: &str, value: &str) -> Result<(), ProviderError> {
        debug!(arn = self.arn, attribute = name, "Setting SNS topic attribute");
        if name != POLICY {
            return self
                .api
                .set_topic_attribute(self.arn, name, value)
                .await
                .map_err(|e| ProviderError::from(e).with_context(format!("setting SNS topic {}", name)));
        }

        // IAM principals created moments ago are rejected until they propagate.
        let api = self.api;
        let arn = self.arn;
        retry_with_backoff(
            &self.settings.policy_retry(),
            is_principal_propagation,
            |attempt| async move {
                if attempt > 1 {
                    debug!(arn, attempt, "Retrying SNS topic policy");
                }
                api.set_topic_attribute(arn, POLICY, value).await
            },
        )
        .await
        .map_err(|e| match e.into_inner() {
            Some(api_err) => ProviderError::from(api_err).with_context("setting SNS topic Policy"),
            None => ProviderError::DeadlineExceeded("setting SNS topic Policy".to_string()),
        })
    }

    /// Write every attribute that differs between `current` and `desired`.
    async fn converge(&self, current: Option<&TopicState>, desired: &TopicState) -> Result<(), ProviderError> {
        let changed = |old: Option<&String>, new: Option<&String>, json: bool| -> bool {
            match (old, new) {
                (Some(old), Some(new)) if json => !policies_equivalent(old, new),
                (old, new) => old != new,
            }
        };

        let fields = [
            (DISPLAY_NAME, current.and_then(|c| c.display_name.as_ref()), desired.display_name.as_ref(), false),
            (POLICY, current.and_then(|c| c.policy.as_ref()), desired.policy.as_ref(), true),
            (
                DELIVERY_POLICY,
                current.and_then(|c| c.delivery_policy.as_ref()),
                desired.delivery_policy.as_ref(),
                true,
            ),
        ];

        for (name, old, new, json) in fields {
            if !changed(old, new, json) {
                continue;
            }
            // Clearing is only meaningful for attributes AWS has no default for.
            if new.is_none() && name == POLICY {
                continue;
            }
            self.set(name, new.map(String::as_str).unwrap_or("")).await?;
        }
        Ok(())
    }

    async fn describe(&self, prior: Option<&TopicState>) -> Result<Option<TopicState>, ProviderError> {
        match self.api.get_topic_attributes(self.arn).await {
            Ok(attrs) => Ok(Some(TopicState::from_remote(self.arn, &attrs, prior))),
            Err(e) if e.is_not_found() => {
                warn!(arn = self.arn, "SNS topic not found, removing from state");
                Ok(None)
            },
            Err(e) => Err(ProviderError::from(e).with_context("reading SNS topic")),
        }
    }

    async fn refreshed(&self, prior: &TopicState) -> Result<Value, ProviderError> {
        match self.describe(Some(prior)).await? {
            Some(state) => encode(&state),
            None => Err(ProviderError::NotFound(format!("SNS topic {}", self.arn))),
        }
    }
}

/// Manages an SNS topic and its display name and policies.
#[derive(Debug, Default, Clone, Copy)]
pub struct SnsTopicResource;

impl SnsTopicResource {
    /// Resource type name.
    pub const TYPE_NAME: &'static str = "aws_sns_topic";
}

#[async_trait]
impl Resource for SnsTopicResource {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_attribute(
                "name",
                Attribute::required_string().with_force_new().with_max_length(256),
            )
            .with_attribute("display_name", Attribute::optional_string())
            .with_attribute(
                "policy",
                Attribute::optional_computed_string().with_description("Access policy JSON"),
            )
            .with_attribute(
                "delivery_policy",
                Attribute::optional_string().with_description("HTTP delivery retry policy JSON"),
            )
            .with_attribute("arn", Attribute::computed_string())
            .with_attribute("id", Attribute::computed_string())
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let mut diagnostics = validate(&self.schema(), config);
        for attribute in ["policy", "delivery_policy"] {
            if let Some(text) = config.get(attribute).and_then(Value::as_str) {
                if let Err(e) = serde_json::from_str::<Value>(text) {
                    diagnostics.push(
                        Diagnostic::error(format!("Invalid JSON in '{}'", attribute))
                            .with_detail(e.to_string())
                            .with_attribute(attribute),
                    );
                }
            }
        }
        diagnostics
    }

    fn suppress_diff(&self, attribute: &str, old: &Value, new: &Value) -> bool {
        match (attribute, old.as_str(), new.as_str()) {
            ("policy" | "delivery_policy", Some(old), Some(new)) => policies_equivalent(old, new),
            _ => false,
        }
    }

    async fn create(&self, ctx: &ProviderContext, planned: Value) -> Result<Value, ProviderError> {
        let desired: TopicState = decode(planned, Self::TYPE_NAME)?;

        info!(name = %desired.name, "Creating SNS topic");
        let arn = ctx
            .clients
            .sns
            .create_topic(&desired.name)
            .await
            .map_err(|e| ProviderError::from(e).with_context("creating SNS topic"))?;
        info!(arn = %arn, "Created SNS topic");

        let topic = Topic::new(ctx, &arn);
        let finish = async {
            topic.converge(None, &desired).await?;
            topic.refreshed(&desired).await
        };

        match finish.await {
            Ok(created) => Ok(created),
            Err(err) => {
                let partial = TopicState {
                    id: Some(arn.clone()),
                    arn: Some(arn.clone()),
                    ..desired.clone()
                };
                Err(undo_create(self, ctx, encode(&partial)?, err).await)
            },
        }
    }

    async fn read(&self, ctx: &ProviderContext, current: Value) -> Result<Option<Value>, ProviderError> {
        let state: TopicState = decode(current, Self::TYPE_NAME)?;
        let arn = state.arn()?;
        match Topic::new(ctx, arn).describe(Some(&state)).await? {
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
        let prior: TopicState = decode(prior, Self::TYPE_NAME)?;
        let desired: TopicState = decode(planned, Self::TYPE_NAME)?;
        let topic = Topic::new(ctx, prior.arn()?);

        info!(arn = topic.arn, "Updating SNS topic");
        topic.converge(Some(&prior), &desired).await?;
        topic.refreshed(&desired).await
    }

    async fn delete(&self, ctx: &ProviderContext, current: Value) -> Result<(), ProviderError> {
        let state: TopicState = decode(current, Self::TYPE_NAME)?;
        let arn = state.arn()?;

        info!(arn, "Deleting SNS topic");
        match ctx.clients.sns.delete_topic(arn).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(ProviderError::from(e).with_context("deleting SNS topic")),
        }
    }

    async fn import(&self, ctx: &ProviderContext, id: &str) -> Result<Option<Value>, ProviderError> {
        match Topic::new(ctx, id).describe(None).await? {
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

    const EXPECTED_POLICY: &str = r#"{"Statement":[{"Sid":"Stmt1445931846145","Effect":"Allow","Principal":{"AWS":"*"},"Action":"sns:Publish","Resource":"arn:aws:sns:us-west-2::example"}],"Version":"2012-10-17","Id":"Policy1445931846145"}"#;

    const PRETTY_POLICY: &str = r#"{
  "Statement": [
    {
      "Sid": "Stmt1445931846145",
      "Effect": "Allow",
      "Principal": {
        "AWS": "*"
       },
      "Action": "sns:Publish",
      "Resource": "arn:aws:sns:us-west-2::example"
    }
  ],
  "Version": "2012-10-17",
  "Id": "Policy1445931846145"
}
"#;

    fn ctx(fakes: &FakeClients) -> ProviderContext {
        ProviderContext {
            config: fast_config(),
            clients: fakes.clients(),
        }
    }

    #[tokio::test]
    async fn test_basic() {
        let fakes = FakeClients::new();
        let ctx = ctx(&fakes);

        let state = SnsTopicResource
            .create(&ctx, json!({"name": "terraform-test-topic"}))
            .await
            .unwrap();

        let arn = state["arn"].as_str().unwrap();
        assert!(arn.starts_with("arn:aws:sns:"));
        assert!(arn.ends_with(":terraform-test-topic"));
        assert_eq!(state["id"], state["arn"]);
        assert_eq!(state["name"], "terraform-test-topic");
        // AWS attaches a default access policy.
        assert!(state["policy"].is_string());
        assert!(fakes.sns.attributes(arn).is_some());
    }

    #[tokio::test]
    async fn test_policy() {
        let fakes = FakeClients::new();
        let ctx = ctx(&fakes);

        let config = json!({"name": "example-abcdefghij", "policy": PRETTY_POLICY});
        let state = SnsTopicResource.create(&ctx, config.clone()).await.unwrap();

        let stored = fakes.sns.attributes(state["arn"].as_str().unwrap()).unwrap();
        assert!(policies_equivalent(&stored[POLICY], EXPECTED_POLICY));
        // State keeps the configured text, not AWS's reformatted copy.
        assert_eq!(state["policy"], PRETTY_POLICY);

        let refreshed = SnsTopicResource.read(&ctx, state.clone()).await.unwrap().unwrap();
        let plan = diff(&SnsTopicResource.schema(), Some(&refreshed), &config, |a, o, n| {
            SnsTopicResource.suppress_diff(a, o, n)
        });
        assert!(!plan.has_changes());
    }

    #[tokio::test]
    async fn test_policy_waits_for_iam_role() {
        let fakes = FakeClients::new();
        let role = "arn:aws:iam::123456789012:role/test/terraform_bug";
        fakes.sns.reject_principal(role, 2);
        let ctx = ctx(&fakes);

        let policy = PRETTY_POLICY.replace(r#""AWS": "*""#, &format!(r#""AWS": "{}""#, role));
        let state = SnsTopicResource
            .create(&ctx, json!({"name": "example", "policy": policy}))
            .await
            .unwrap();

        let stored = fakes.sns.attributes(state["arn"].as_str().unwrap()).unwrap();
        assert!(stored[POLICY].contains(role));
        assert_eq!(fakes.sns.policy_rejections(), 2);
    }

    #[tokio::test]
    async fn test_policy_propagation_gives_up() {
        let fakes = FakeClients::new();
        let role = "arn:aws:iam::123456789012:role/never";
        fakes.sns.reject_principal(role, u32::MAX);
        let ctx = ctx(&fakes);

        let policy = json!({
            "Statement": [{"Effect": "Allow", "Principal": {"AWS": role}, "Action": "sns:Publish"}]
        })
        .to_string();
        let err = SnsTopicResource
            .create(&ctx, json!({"name": "example", "policy": policy}))
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Validation(_)));
        assert!(err.message().contains("PrincipalNotFound"));
        // The topic created before the policy write is not left behind.
        let arn = format!("arn:aws:sns:{}:{}:example", crate::testing::REGION, crate::testing::ACCOUNT_ID);
        assert!(fakes.sns.attributes(&arn).is_none());
    }

    #[tokio::test]
    async fn test_update_attributes() {
        let fakes = FakeClients::new();
        let ctx = ctx(&fakes);
        let prior = SnsTopicResource
            .create(&ctx, json!({"name": "alerts", "display_name": "Alerts"}))
            .await
            .unwrap();
        assert_eq!(prior["display_name"], "Alerts");

        let delivery = r#"{"http":{"defaultHealthyRetryPolicy":{"numRetries":3}}}"#;
        let config = json!({"name": "alerts", "delivery_policy": delivery});
        let plan = diff(&SnsTopicResource.schema(), Some(&prior), &config, |a, o, n| {
            SnsTopicResource.suppress_diff(a, o, n)
        });
        assert!(!plan.requires_replace);

        let updated = SnsTopicResource
            .update(&ctx, prior.clone(), plan.planned_state)
            .await
            .unwrap();
        assert!(updated["display_name"].is_null());
        assert_eq!(updated["delivery_policy"], delivery);
        assert_eq!(updated["policy"], prior["policy"]);
    }

    #[test]
    fn test_validate_policy_json() {
        let diagnostics = SnsTopicResource.validate(&json!({"name": "t", "policy": "{not json"}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("policy"));
    }

    #[test]
    fn test_suppress_diff() {
        assert!(SnsTopicResource.suppress_diff(
            "policy",
            &json!(EXPECTED_POLICY),
            &json!(PRETTY_POLICY)
        ));
        assert!(!SnsTopicResource.suppress_diff("display_name", &json!("a"), &json!("a ")));
    }

    #[tokio::test]
    async fn test_read_deleted_and_delete_twice() {
        let fakes = FakeClients::new();
        let ctx = ctx(&fakes);
        let state = SnsTopicResource.create(&ctx, json!({"name": "gone"})).await.unwrap();

        SnsTopicResource.delete(&ctx, state.clone()).await.unwrap();
        assert!(fakes.sns.attributes(state["arn"].as_str().unwrap()).is_none());
        assert!(SnsTopicResource.read(&ctx, state.clone()).await.unwrap().is_none());
        SnsTopicResource.delete(&ctx, state).await.unwrap();
    }

    #[tokio::test]
    async fn test_import_by_arn() {
        let fakes = FakeClients::new();
        let ctx = ctx(&fakes);
        let state = SnsTopicResource
            .create(&ctx, json!({"name": "imported", "display_name": "Imported"}))
            .await
            .unwrap();

        let imported = SnsTopicResource
            .import(&ctx, state["arn"].as_str().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(imported["name"], "imported");
        assert_eq!(imported["display_name"], "Imported");
    }
}
