//! The framework-facing provider interface.
//!
//! The plan/apply engine drives a provider exclusively through
//! [`ProviderService`]. [`AwsProvider`](crate::provider::AwsProvider) is the
//! implementation shipped by this crate.

use crate::error::ProviderError;
use crate::schema::{Diagnostic, ProviderSchema};
use crate::types::{ImportedResource, PlanResult, ProviderMetadata};

/// Trait the provider framework calls into.
///
/// States are JSON objects shaped by the resource schema. A `null` state
/// means the resource does not exist.
///
/// # Example
///
/// ```
/// use hemmer_provider_aws::{ProviderService, ProviderError, PlanResult, ProviderSchema};
/// use hemmer_provider_aws::schema::{Attribute, Diagnostic, Schema};
/// use serde_json::Value;
///
/// struct Echo;
///
/// #[async_trait::async_trait]
/// impl ProviderService for Echo {
///     fn schema(&self) -> ProviderSchema {
///         ProviderSchema::new()
///             .with_resource("echo", Schema::v0().with_attribute("name", Attribute::required_string()))
///     }
///
///     async fn configure(&self, _config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
///         Ok(vec![])
///     }
///
///     async fn plan(&self, _t: &str, _prior: Option<Value>, proposed: Value, _config: Value)
///         -> Result<PlanResult, ProviderError> {
///         Ok(PlanResult::no_change(proposed))
///     }
///
///     async fn create(&self, _t: &str, planned: Value) -> Result<Value, ProviderError> { Ok(planned) }
///     async fn read(&self, _t: &str, current: Value) -> Result<Value, ProviderError> { Ok(current) }
///     async fn update(&self, _t: &str, _prior: Value, planned: Value) -> Result<Value, ProviderError> { Ok(planned) }
///     async fn delete(&self, _t: &str, _current: Value) -> Result<(), ProviderError> { Ok(()) }
/// }
///
/// assert_eq!(Echo.metadata().resources, vec!["echo".to_string()]);
/// ```
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// Return the provider's schema including all resources.
    fn schema(&self) -> ProviderSchema;

    /// Return provider metadata. By default, this is derived from the schema.
    fn metadata(&self) -> ProviderMetadata {
        let mut resources: Vec<String> = self.schema().resources.keys().cloned().collect();
        resources.sort();
        ProviderMetadata {
            resources,
            plan_destroy: false,
        }
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate the provider configuration before configuring.
    async fn validate_provider_config(
        &self,
        config: serde_json::Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = config;
        Ok(vec![])
    }

    /// Configure the provider with credentials and settings.
    async fn configure(&self, config: serde_json::Value) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Stop the provider gracefully.
    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource's configuration before planning.
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: serde_json::Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (resource_type, config);
        Ok(vec![])
    }

    /// Upgrade resource state from an older schema version.
    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: u64,
        state: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        let _ = (resource_type, version);
        Ok(state)
    }

    /// Plan changes for a resource. `proposed_state` is `null` for a destroy.
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<serde_json::Value>,
        proposed_state: serde_json::Value,
        config: serde_json::Value,
    ) -> Result<PlanResult, ProviderError>;

    /// Create a new resource.
    async fn create(
        &self,
        resource_type: &str,
        planned_state: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError>;

    /// Read the current state of a resource. Returns `null` if it is gone.
    async fn read(
        &self,
        resource_type: &str,
        current_state: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError>;

    /// Update an existing resource.
    async fn update(
        &self,
        resource_type: &str,
        prior_state: serde_json::Value,
        planned_state: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError>;

    /// Delete a resource.
    async fn delete(
        &self,
        resource_type: &str,
        current_state: serde_json::Value,
    ) -> Result<(), ProviderError>;

    /// Import existing infrastructure into management.
    async fn import_resource(
        &self,
        resource_type: &str,
        _id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        Err(ProviderError::Unimplemented(format!(
            "Import not supported for resource type: {}",
            resource_type
        )))
    }
}

/// Turn an operation failure into a single error diagnostic.
pub fn error_to_diagnostics(err: &ProviderError) -> Vec<Diagnostic> {
    vec![Diagnostic::error(err.to_string())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, Schema};
    use serde_json::{json, Value};

    struct Minimal;

    #[async_trait::async_trait]
    impl ProviderService for Minimal {
        fn schema(&self) -> ProviderSchema {
            ProviderSchema::new()
                .with_resource("zeta", Schema::v0().with_attribute("id", Attribute::computed_string()))
                .with_resource("alpha", Schema::v0())
        }

        async fn configure(&self, _config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
            Ok(vec![])
        }

        async fn plan(
            &self,
            _resource_type: &str,
            _prior_state: Option<Value>,
            proposed_state: Value,
            _config: Value,
        ) -> Result<PlanResult, ProviderError> {
            Ok(PlanResult::no_change(proposed_state))
        }

        async fn create(&self, _resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
            Ok(planned_state)
        }

        async fn read(&self, _resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
            Ok(current_state)
        }

        async fn update(
            &self,
            _resource_type: &str,
            _prior_state: Value,
            planned_state: Value,
        ) -> Result<Value, ProviderError> {
            Ok(planned_state)
        }

        async fn delete(&self, _resource_type: &str, _current_state: Value) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    #[test]
    fn test_metadata_is_sorted() {
        let metadata = Minimal.metadata();
        assert_eq!(metadata.resources, vec!["alpha".to_string(), "zeta".to_string()]);
        assert!(!metadata.plan_destroy);
    }

    #[tokio::test]
    async fn test_default_methods() {
        let provider = Minimal;
        assert!(provider.validate_provider_config(json!({})).await.unwrap().is_empty());
        assert!(provider.validate_resource_config("alpha", json!({})).await.unwrap().is_empty());
        assert_eq!(
            provider.upgrade_resource_state("alpha", 0, json!({"a": 1})).await.unwrap(),
            json!({"a": 1})
        );
        provider.stop().await.unwrap();

        let err = provider.import_resource("alpha", "x").await.unwrap_err();
        assert!(matches!(err, ProviderError::Unimplemented(_)));
    }

    #[test]
    fn test_error_to_diagnostics() {
        let diagnostics = error_to_diagnostics(&ProviderError::NotFound("stream events".into()));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].is_error());
        assert!(diagnostics[0].summary.contains("stream events"));
    }
}
