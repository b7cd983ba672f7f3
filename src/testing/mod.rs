//! Testing utilities: a provider harness and in-memory AWS services.
//!
//! [`ProviderTester`] drives any [`ProviderService`] through the same calls
//! the framework makes. [`FakeClients`] bundles in-memory WAF, Kinesis and
//! SNS endpoints that behave like the real ones where it matters (change
//! tokens, status transitions, policy reformatting), so resources can be
//! exercised without credentials.
//!
//! # Example
//!
//! ```
//! use hemmer_provider_aws::testing::{fast_config, FakeClients, ProviderTester};
//! use hemmer_provider_aws::AwsProvider;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let fakes = FakeClients::new();
//! let tester = ProviderTester::new(AwsProvider::new(fakes.clients(), fast_config()));
//!
//! let state = tester
//!     .lifecycle_create("aws_sns_topic", json!({"name": "alerts"}))
//!     .await
//!     .unwrap();
//! assert_eq!(state["name"], "alerts");
//! # });
//! ```

mod fake_kinesis;
mod fake_sns;
mod fake_waf;

pub use fake_kinesis::FakeKinesis;
pub use fake_sns::FakeSns;
pub use fake_waf::FakeWaf;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::{KinesisSettings, ProviderConfig, SnsSettings, WafSettings};
use crate::error::ProviderError;
use crate::resource::AwsClients;
use crate::schema::{Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::service::ProviderService;
use crate::types::{ImportedResource, PlanResult};
use serde_json::Value;

/// Region the fakes build ARNs in.
pub const REGION: &str = "us-east-1";
/// Account the fakes build ARNs in.
pub const ACCOUNT_ID: &str = "123456789012";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One fake per service, shared with the [`AwsClients`] built from them.
#[derive(Debug, Clone, Default)]
pub struct FakeClients {
    /// Global WAF.
    pub waf: Arc<FakeWaf>,
    /// Kinesis.
    pub kinesis: Arc<FakeKinesis>,
    /// SNS.
    pub sns: Arc<FakeSns>,
}

impl FakeClients {
    /// Fresh, empty services.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clients backed by these fakes.
    pub fn clients(&self) -> AwsClients {
        AwsClients {
            waf: self.waf.clone(),
            kinesis: self.kinesis.clone(),
            sns: self.sns.clone(),
        }
    }
}

/// A configuration with millisecond backoffs and polls, for tests.
///
/// Waiting for WAF change tokens to sync is off.
pub fn fast_config() -> ProviderConfig {
    ProviderConfig {
        region: REGION.to_string(),
        waf: WafSettings {
            max_attempts: 5,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
            deadline_secs: 10,
            sync_timeout_secs: None,
            sync_poll_interval_ms: 1,
        },
        kinesis: KinesisSettings {
            create_timeout_secs: 5,
            update_timeout_secs: 5,
            delete_timeout_secs: 5,
            poll_interval_ms: 1,
        },
        sns: SnsSettings {
            policy_max_attempts: 4,
            policy_initial_backoff_ms: 1,
            policy_max_backoff_ms: 4,
        },
    }
}

/// A test harness for provider implementations.
///
/// This wraps a `ProviderService` implementation and provides
/// simplified methods for testing it without the host framework.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Create a new tester for the given provider.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Get a reference to the underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Get a mutable reference to the underlying provider.
    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// Get the provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Get the list of resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate provider configuration.
    ///
    /// Returns `Err` with the diagnostics if there are errors.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Configure the provider.
    ///
    /// Returns `Err` with the diagnostics if there are errors.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Stop the provider.
    pub async fn stop(&self) -> Result<(), ProviderError> {
        self.provider.stop().await
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource configuration.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a resource creation (no prior state).
    pub async fn plan_create(
        &self,
        resource_type: &str,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, None, proposed_state.clone(), proposed_state)
            .await
    }

    /// Plan a resource update.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(
                resource_type,
                Some(prior_state),
                proposed_state.clone(),
                proposed_state,
            )
            .await
    }

    /// Plan a resource deletion.
    pub async fn plan_delete(
        &self,
        resource_type: &str,
        prior_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), Value::Null, Value::Null)
            .await
    }

    /// Full plan operation with explicit config.
    pub async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, prior_state, proposed_state, config)
            .await
    }

    /// Create a new resource.
    pub async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    /// Read the current state of a resource. `null` means it is gone.
    pub async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.read(resource_type, current_state).await
    }

    /// Update an existing resource.
    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await
    }

    /// Delete a resource.
    pub async fn delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, current_state).await
    }

    /// Import an existing resource.
    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    /// Upgrade resource state from an older schema version.
    pub async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: u64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .upgrade_resource_state(resource_type, version, state)
            .await
    }

    // =========================================================================
    // Lifecycle Helpers
    // =========================================================================

    /// Run a full create lifecycle: plan → create → read.
    ///
    /// Returns the final state after read.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan_result = self.plan_create(resource_type, config).await?;

        let created_state = self
            .create(resource_type, plan_result.planned_state)
            .await?;

        self.read(resource_type, created_state).await
    }

    /// Run a full update lifecycle: plan → update → read.
    ///
    /// Returns the final state after read. A plan that requires replacement
    /// is an error here; use [`lifecycle_replace`](Self::lifecycle_replace).
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<Value, ProviderError> {
        let plan_result = self
            .plan_update(resource_type, prior_state.clone(), proposed_state)
            .await?;
        if plan_result.requires_replace {
            return Err(ProviderError::FailedPrecondition(format!(
                "{} update requires replacement",
                resource_type
            )));
        }

        let updated_state = self
            .update(resource_type, prior_state, plan_result.planned_state)
            .await?;

        self.read(resource_type, updated_state).await
    }

    /// Run a replacement: plan → delete → create → read.
    pub async fn lifecycle_replace(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<Value, ProviderError> {
        let plan_result = self
            .plan_update(resource_type, prior_state.clone(), proposed_state)
            .await?;

        self.delete(resource_type, prior_state).await?;
        let created_state = self
            .create(resource_type, plan_result.planned_state)
            .await?;
        self.read(resource_type, created_state).await
    }

    /// Run a full delete lifecycle: plan → delete.
    pub async fn lifecycle_delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        let _ = self
            .plan_delete(resource_type, current_state.clone())
            .await?;

        self.delete(resource_type, current_state).await
    }

    /// Run a full CRUD lifecycle: create → read → update → read → delete.
    ///
    /// Returns the state after the update (before delete).
    pub async fn lifecycle_crud(
        &self,
        resource_type: &str,
        initial_config: Value,
        updated_config: Value,
    ) -> Result<Value, ProviderError> {
        let created_state = self.lifecycle_create(resource_type, initial_config).await?;

        let updated_state = self
            .lifecycle_update(resource_type, created_state.clone(), updated_config)
            .await?;

        self.lifecycle_delete(resource_type, updated_state.clone())
            .await?;

        Ok(updated_state)
    }
}

/// Error type for test operations that may fail with diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// The operation failed with diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The operation failed with a provider error.
    Provider(ProviderError),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  [{:?}] {}", diag.severity, diag.summary)?;
                    if let Some(detail) = &diag.detail {
                        write!(f, ": {}", detail)?;
                    }
                    if let Some(attr) = &diag.attribute {
                        write!(f, " (at {})", attr)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            },
            TestError::Provider(e) => write!(f, "Provider error: {}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics
        .into_iter()
        .filter(|d| matches!(d.severity, DiagnosticSeverity::Error))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

/// Assert that a plan result indicates the resource will be created.
///
/// # Panics
///
/// Panics if the plan has no changes or requires replacement.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert!(
        !plan.changes.is_empty(),
        "Expected plan to have changes for create, but got no changes"
    );
    assert!(
        !plan.requires_replace,
        "Expected plan to create, not replace"
    );
}

/// Assert that a plan result indicates no changes.
///
/// # Panics
///
/// Panics if the plan has any changes.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.changes.is_empty(),
        "Expected no changes, but got {} change(s): {:?}",
        plan.changes.len(),
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan requires resource replacement.
///
/// # Panics
///
/// Panics if the plan does not require replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "Expected plan to require replacement, but it does not"
    );
}

/// Assert that a plan does not require resource replacement.
///
/// # Panics
///
/// Panics if the plan requires replacement.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(
        !plan.requires_replace,
        "Expected plan to update in place, but it requires replacement"
    );
}

/// Assert that a plan has a change for a specific attribute path.
///
/// # Panics
///
/// Panics if the plan does not have a change for the given path.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    let has_change = plan.changes.iter().any(|c| c.path == path);
    assert!(
        has_change,
        "Expected plan to change attribute '{}', but it was not changed. Changed attributes: {:?}",
        path,
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain no errors.
///
/// # Panics
///
/// Panics if there are any error diagnostics.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| matches!(d.severity, DiagnosticSeverity::Error))
        .collect();

    assert!(
        errors.is_empty(),
        "Expected no errors, but got {} error(s): {:?}",
        errors.len(),
        errors.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain an error with the given summary substring.
///
/// # Panics
///
/// Panics if no error diagnostic contains the given substring.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let has_matching_error = diagnostics
        .iter()
        .any(|d| matches!(d.severity, DiagnosticSeverity::Error) && d.summary.contains(substring));

    assert!(
        has_matching_error,
        "Expected an error containing '{}', but no matching error found. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| matches!(d.severity, DiagnosticSeverity::Error))
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::AwsProvider;
    use serde_json::json;

    fn tester(fakes: &FakeClients) -> ProviderTester<AwsProvider> {
        ProviderTester::new(AwsProvider::new(fakes.clients(), fast_config()))
    }

    #[test]
    fn test_resource_types() {
        let tester = tester(&FakeClients::new());
        assert_eq!(tester.resource_types().len(), 4);
        assert!(tester.schema().resources.contains_key("aws_waf_rule"));
    }

    #[tokio::test]
    async fn test_configure_and_validate() {
        let tester = tester(&FakeClients::new());
        assert!(tester.validate_provider_config(json!({})).await.is_ok());
        assert!(tester.configure(json!({"region": "us-west-2"})).await.is_ok());

        let err = tester
            .validate_provider_config(json!({"kinesis": {"poll_interval_ms": 0}}))
            .await
            .unwrap_err();
        assert!(matches!(err, TestError::Diagnostics(ref d) if d.len() == 1));
        assert!(err.to_string().contains("kinesis.poll_interval_ms"));

        assert!(tester.stop().await.is_ok());
    }

    #[tokio::test]
    async fn test_kinesis_crud() {
        let fakes = FakeClients::new();
        let tester = tester(&fakes);

        let updated = tester
            .lifecycle_crud(
                "aws_kinesis_stream",
                json!({"name": "clicks", "shard_count": 1}),
                json!({"name": "clicks", "shard_count": 2, "retention_period": 48, "tags": {"Team": "web"}}),
            )
            .await
            .unwrap();

        assert_eq!(updated["shard_count"], 2);
        assert_eq!(updated["retention_period"], 48);
        assert_eq!(updated["tags"], json!({"Team": "web"}));
        assert!(fakes.kinesis.stream("clicks").is_none());
    }

    #[tokio::test]
    async fn test_sns_crud() {
        let fakes = FakeClients::new();
        let tester = tester(&fakes);

        let updated = tester
            .lifecycle_crud(
                "aws_sns_topic",
                json!({"name": "alerts"}),
                json!({"name": "alerts", "display_name": "Alerts"}),
            )
            .await
            .unwrap();

        assert_eq!(updated["display_name"], "Alerts");
        assert!(fakes.sns.attributes(updated["arn"].as_str().unwrap()).is_none());
    }

    #[tokio::test]
    async fn test_waf_rule_crud() {
        let fakes = FakeClients::new();
        let tester = tester(&fakes);
        let predicate = |data_id: &str| {
            json!({"negated": false, "data_id": data_id, "type": "IPMatch"})
        };

        let updated = tester
            .lifecycle_crud(
                "aws_waf_rule",
                json!({"name": "block", "metric_name": "block", "predicates": [predicate("a")]}),
                json!({"name": "block", "metric_name": "block", "predicates": [predicate("b")]}),
            )
            .await
            .unwrap();

        assert_eq!(updated["predicates"][0]["data_id"], "b");
        assert!(fakes.waf.rule(updated["id"].as_str().unwrap()).is_none());
    }

    #[tokio::test]
    async fn test_size_constraint_set_replace() {
        let fakes = FakeClients::new();
        let tester = tester(&fakes);
        let constraint = json!({
            "field_to_match": [{"type": "URI"}],
            "comparison_operator": "LT",
            "size": 2048,
            "text_transformation": "URL_DECODE"
        });

        let first = tester
            .lifecycle_create(
                "aws_waf_size_constraint_set",
                json!({"name": "uris", "size_constraints": [constraint.clone()]}),
            )
            .await
            .unwrap();

        let renamed = json!({"name": "short-uris", "size_constraints": [constraint]});
        let plan = tester
            .plan_update("aws_waf_size_constraint_set", first.clone(), renamed.clone())
            .await
            .unwrap();
        assert_plan_replaces(&plan);
        assert_plan_changes_attribute(&plan, "name");

        let err = tester
            .lifecycle_update("aws_waf_size_constraint_set", first.clone(), renamed.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::FailedPrecondition(_)));

        let second = tester
            .lifecycle_replace("aws_waf_size_constraint_set", first.clone(), renamed)
            .await
            .unwrap();
        assert_eq!(second["name"], "short-uris");
        assert_ne!(second["id"], first["id"]);
        assert!(fakes.waf.size_constraint_set(first["id"].as_str().unwrap()).is_none());
    }

    #[tokio::test]
    async fn test_plan_no_changes_after_create() {
        let fakes = FakeClients::new();
        let tester = tester(&fakes);
        let config = json!({"name": "orders", "shard_count": 3});

        let plan = tester.plan_create("aws_kinesis_stream", config.clone()).await.unwrap();
        assert_plan_creates(&plan);

        let state = tester.lifecycle_create("aws_kinesis_stream", config.clone()).await.unwrap();
        let plan = tester
            .plan_update("aws_kinesis_stream", state, config)
            .await
            .unwrap();
        assert_plan_no_changes(&plan);
        assert_plan_updates_in_place(&plan);
    }

    #[tokio::test]
    async fn test_resource_config_validation() {
        let tester = tester(&FakeClients::new());
        assert!(tester
            .validate_resource_config("aws_sns_topic", json!({"name": "t"}))
            .await
            .is_ok());

        let err = tester
            .validate_resource_config("aws_sns_topic", json!({"name": "t", "policy": "{"}))
            .await
            .unwrap_err();
        match err {
            TestError::Diagnostics(diagnostics) => {
                assert_error_contains(&diagnostics, "Invalid JSON");
            },
            other => panic!("expected diagnostics, got {other}"),
        }
        assert_no_errors(&[]);
    }

    #[tokio::test]
    async fn test_upgrade_state_passthrough() {
        let tester = tester(&FakeClients::new());
        let state = json!({"name": "t"});
        assert_eq!(
            tester
                .upgrade_resource_state("aws_sns_topic", 0, state.clone())
                .await
                .unwrap(),
            state
        );
    }
}
