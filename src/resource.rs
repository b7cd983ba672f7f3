//! The per-resource-type interface and the context each operation receives.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{error, warn};

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::kinesis::KinesisApi;
use crate::schema::{Diagnostic, Schema};
use crate::sns::SnsApi;
use crate::validation::validate;
use crate::waf::WafApi;

/// Service clients shared by every resource.
#[derive(Clone)]
pub struct AwsClients {
    /// Global WAF.
    pub waf: Arc<dyn WafApi>,
    /// Kinesis in the configured region.
    pub kinesis: Arc<dyn KinesisApi>,
    /// SNS in the configured region.
    pub sns: Arc<dyn SnsApi>,
}

impl std::fmt::Debug for AwsClients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsClients").finish_non_exhaustive()
    }
}

/// Everything a resource operation may use, passed explicitly.
#[derive(Debug, Clone)]
pub struct ProviderContext {
    /// Snapshot of the provider configuration.
    pub config: ProviderConfig,
    /// Service clients.
    pub clients: AwsClients,
}

/// One managed resource type.
///
/// `read` returns `Ok(None)` when the remote object is gone, which clears
/// it from state. `delete` treats an already-missing object as success.
#[async_trait]
pub trait Resource: Send + Sync {
    /// Type name, e.g. `aws_kinesis_stream`.
    fn type_name(&self) -> &'static str;

    /// Schema of the resource.
    fn schema(&self) -> Schema;

    /// Validate a configuration. Defaults to schema validation only.
    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        validate(&self.schema(), config)
    }

    /// Whether a difference between `old` and `new` for `attribute` is cosmetic.
    fn suppress_diff(&self, attribute: &str, old: &Value, new: &Value) -> bool {
        let _ = (attribute, old, new);
        false
    }

    /// Create the remote object and return its state.
    async fn create(&self, ctx: &ProviderContext, planned: Value) -> Result<Value, ProviderError>;

    /// Refresh state from the remote object.
    async fn read(&self, ctx: &ProviderContext, current: Value)
        -> Result<Option<Value>, ProviderError>;

    /// Apply an in-place update.
    async fn update(
        &self,
        ctx: &ProviderContext,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError>;

    /// Delete the remote object.
    async fn delete(&self, ctx: &ProviderContext, current: Value) -> Result<(), ProviderError>;

    /// Build state for an existing object from its import identifier.
    async fn import(&self, ctx: &ProviderContext, id: &str) -> Result<Option<Value>, ProviderError> {
        let _ = (ctx, id);
        Err(ProviderError::Unimplemented(format!(
            "Import not supported for resource type: {}",
            self.type_name()
        )))
    }
}

/// Decode a state or configuration object into a typed model.
pub(crate) fn decode<T: DeserializeOwned>(value: Value, what: &str) -> Result<T, ProviderError> {
    serde_json::from_value(value)
        .map_err(|e| ProviderError::Validation(format!("invalid {} state: {}", what, e)))
}

/// Encode a typed model back into state.
pub(crate) fn encode<T: Serialize>(model: &T) -> Result<Value, ProviderError> {
    Ok(serde_json::to_value(model)?)
}

/// Treat an explicit `null` like a missing field.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Delete an object whose create failed after the remote call succeeded.
///
/// A failed create returns no state, so the host would never track the
/// object. `created` must hold enough state for `resource.delete`. Returns
/// `err` either way; a failed cleanup is only logged.
pub(crate) async fn undo_create<R: Resource + ?Sized>(
    resource: &R,
    ctx: &ProviderContext,
    created: Value,
    err: ProviderError,
) -> ProviderError {
    let resource_type = resource.type_name();
    warn!(resource_type, error = %err, "Create failed part-way, deleting the new object");
    if let Err(cleanup) = resource.delete(ctx, created).await {
        error!(resource_type, error = %cleanup, "Could not delete partially created object");
    }
    err
}

/// Elements to remove and to add to turn `old` into `new`, both sorted.
pub(crate) fn set_changes<T: Ord + Clone>(old: &[T], new: &[T]) -> (Vec<T>, Vec<T>) {
    let old: BTreeSet<&T> = old.iter().collect();
    let new: BTreeSet<&T> = new.iter().collect();
    let removed = old.difference(&new).map(|t| (*t).clone()).collect();
    let added = new.difference(&old).map(|t| (*t).clone()).collect();
    (removed, added)
}
