//! The AWS provider: routes framework calls to the registered resources.

use std::collections::BTreeMap;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::kinesis::KinesisStreamResource;
use crate::plan::diff;
use crate::resource::{AwsClients, ProviderContext, Resource};
use crate::schema::{Diagnostic, ProviderSchema};
use crate::service::{error_to_diagnostics, ProviderService};
use crate::sns::SnsTopicResource;
use crate::types::{ImportedResource, PlanResult};
use crate::validation::validate;
use crate::waf::{SizeConstraintSetResource, WafRuleResource};

/// Provider for Kinesis streams, SNS topics and WAF rules and size
/// constraint sets.
///
/// # Example
///
/// ```
/// use hemmer_provider_aws::provider::AwsProvider;
/// use hemmer_provider_aws::testing::FakeClients;
/// use hemmer_provider_aws::ProviderService;
///
/// let provider = AwsProvider::new(FakeClients::new().clients(), Default::default());
/// assert!(provider.schema().resources.contains_key("aws_sns_topic"));
/// ```
pub struct AwsProvider {
    clients: AwsClients,
    config: RwLock<ProviderConfig>,
    resources: BTreeMap<&'static str, Box<dyn Resource>>,
}

impl std::fmt::Debug for AwsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsProvider")
            .field("resources", &self.resources.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl AwsProvider {
    /// Create a provider with every supported resource registered.
    pub fn new(clients: AwsClients, config: ProviderConfig) -> Self {
        let mut provider = Self {
            clients,
            config: RwLock::new(config),
            resources: BTreeMap::new(),
        };
        provider.register(KinesisStreamResource);
        provider.register(SnsTopicResource);
        provider.register(WafRuleResource);
        provider.register(SizeConstraintSetResource);
        provider
    }

    fn register(&mut self, resource: impl Resource + 'static) {
        self.resources.insert(resource.type_name(), Box::new(resource));
    }

    fn resource(&self, resource_type: &str) -> Result<&dyn Resource, ProviderError> {
        self.resources
            .get(resource_type)
            .map(|r| r.as_ref())
            .ok_or_else(|| ProviderError::UnknownResource(resource_type.to_string()))
    }

    async fn context(&self) -> ProviderContext {
        ProviderContext {
            config: self.config.read().await.clone(),
            clients: self.clients.clone(),
        }
    }

    /// The configuration currently in effect.
    pub async fn config(&self) -> ProviderConfig {
        self.config.read().await.clone()
    }
}

#[async_trait::async_trait]
impl ProviderService for AwsProvider {
    fn schema(&self) -> ProviderSchema {
        self.resources.iter().fold(
            ProviderSchema::new().with_provider_config(ProviderConfig::schema()),
            |schema, (name, resource)| schema.with_resource(*name, resource.schema()),
        )
    }

    #[instrument(skip(self, config), name = "provider.validate_provider_config")]
    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        if config.is_null() {
            return Ok(vec![]);
        }
        let diagnostics = validate(&ProviderConfig::schema(), &config);
        if !diagnostics.is_empty() {
            warn!(diagnostics = diagnostics.len(), "Provider config has errors");
        }
        Ok(diagnostics)
    }

    #[instrument(skip(self, config), name = "provider.configure")]
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let diagnostics = self.validate_provider_config(config.clone()).await?;
        if diagnostics.iter().any(Diagnostic::is_error) {
            warn!(diagnostics = diagnostics.len(), "Configure rejected");
            return Ok(diagnostics);
        }

        match ProviderConfig::from_value(config) {
            Ok(parsed) => {
                info!(region = %parsed.region, "Provider configured");
                *self.config.write().await = parsed;
                Ok(diagnostics)
            },
            Err(e) => {
                error!(error = %e, "Configure failed");
                Ok(error_to_diagnostics(&e))
            },
        }
    }

    #[instrument(skip(self, config), name = "provider.validate_resource_config")]
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let diagnostics = self.resource(resource_type)?.validate(&config);
        if diagnostics.is_empty() {
            debug!(resource_type, "Resource config valid");
        } else {
            warn!(resource_type, diagnostics = diagnostics.len(), "Resource config has errors");
        }
        Ok(diagnostics)
    }

    #[instrument(skip(self, prior_state, proposed_state, _config), name = "provider.plan")]
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        let resource = self.resource(resource_type)?;
        let result = diff(
            &resource.schema(),
            prior_state.as_ref(),
            &proposed_state,
            |attribute, old, new| resource.suppress_diff(attribute, old, new),
        );
        info!(
            resource_type,
            changes = result.changes.len(),
            requires_replace = result.requires_replace,
            "Plan completed"
        );
        Ok(result)
    }

    #[instrument(skip(self, planned_state), name = "provider.create")]
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        let resource = self.resource(resource_type)?;
        let ctx = self.context().await;
        match resource.create(&ctx, planned_state).await {
            Ok(state) => {
                info!(resource_type, "Create completed successfully");
                Ok(state)
            },
            Err(e) => {
                error!(resource_type, error = %e, "Create failed");
                Err(e)
            },
        }
    }

    #[instrument(skip(self, current_state), name = "provider.read")]
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
        let resource = self.resource(resource_type)?;
        if current_state.is_null() {
            return Ok(Value::Null);
        }
        let ctx = self.context().await;
        match resource.read(&ctx, current_state).await {
            Ok(Some(state)) => {
                debug!(resource_type, "Read completed successfully");
                Ok(state)
            },
            Ok(None) => {
                info!(resource_type, "Resource no longer exists");
                Ok(Value::Null)
            },
            Err(e) => {
                error!(resource_type, error = %e, "Read failed");
                Err(e)
            },
        }
    }

    #[instrument(skip(self, prior_state, planned_state), name = "provider.update")]
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let resource = self.resource(resource_type)?;
        let ctx = self.context().await;
        match resource.update(&ctx, prior_state, planned_state).await {
            Ok(state) => {
                info!(resource_type, "Update completed successfully");
                Ok(state)
            },
            Err(e) => {
                error!(resource_type, error = %e, "Update failed");
                Err(e)
            },
        }
    }

    #[instrument(skip(self, current_state), name = "provider.delete")]
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        let resource = self.resource(resource_type)?;
        if current_state.is_null() {
            return Ok(());
        }
        let ctx = self.context().await;
        match resource.delete(&ctx, current_state).await {
            Ok(()) => {
                info!(resource_type, "Delete completed successfully");
                Ok(())
            },
            Err(e) => {
                error!(resource_type, error = %e, "Delete failed");
                Err(e)
            },
        }
    }

    #[instrument(skip(self), name = "provider.import_resource")]
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let resource = self.resource(resource_type)?;
        let ctx = self.context().await;
        match resource.import(&ctx, id).await {
            Ok(Some(state)) => {
                info!(resource_type, id, "Import completed successfully");
                Ok(vec![ImportedResource::new(resource_type, state)])
            },
            Ok(None) => {
                warn!(resource_type, id, "Nothing to import");
                Err(ProviderError::NotFound(format!("{} {}", resource_type, id)))
            },
            Err(e) => {
                error!(resource_type, id, error = %e, "Import failed");
                Err(e)
            },
        }
    }
}
