//! Provider configuration.
//!
//! The provider block is deserialised into [`ProviderConfig`]. Every field has
//! a default, so an empty block is valid. Resource operations receive a
//! snapshot of the config through
//! [`ProviderContext`](crate::resource::ProviderContext) instead of reading
//! process-wide state.
//!
//! ```
//! use hemmer_provider_aws::config::ProviderConfig;
//! use serde_json::json;
//!
//! let config = ProviderConfig::from_value(json!({
//!     "region": "us-west-2",
//!     "waf": { "max_attempts": 5 }
//! }))
//! .unwrap();
//! assert_eq!(config.region, "us-west-2");
//! assert_eq!(config.waf.max_attempts, 5);
//! assert_eq!(config.kinesis.poll_interval_ms, 1000);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::retry::RetryPolicy;
use crate::schema::{Attribute, Block, NestedBlock, Schema};

/// Top-level provider configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    /// AWS region for regional services.
    pub region: String,
    /// WAF change-token retry settings.
    pub waf: WafSettings,
    /// Kinesis state-transition timeouts.
    pub kinesis: KinesisSettings,
    /// SNS attribute propagation settings.
    pub sns: SnsSettings,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            waf: WafSettings::default(),
            kinesis: KinesisSettings::default(),
            sns: SnsSettings::default(),
        }
    }
}

impl ProviderConfig {
    /// Parse a provider configuration block. `null` yields the defaults.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ProviderError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value)
            .map_err(|e| ProviderError::Configuration(format!("invalid provider config: {}", e)))
    }

    /// Schema of the provider configuration block.
    pub fn schema() -> Schema {
        Schema::v0()
            .with_attribute(
                "region",
                Attribute::optional_string()
                    .with_description("AWS region for regional services")
                    .with_default(serde_json::json!("us-east-1")),
            )
            .with_block(
                "waf",
                NestedBlock::single(
                    Block::new()
                        .with_attribute("max_attempts", Attribute::optional_int64().with_int_range(1, 1000))
                        .with_attribute("initial_backoff_ms", Attribute::optional_int64().with_int_range(0, 3_600_000))
                        .with_attribute("max_backoff_ms", Attribute::optional_int64().with_int_range(0, 3_600_000))
                        .with_attribute("deadline_secs", Attribute::optional_int64().with_int_range(1, 86_400))
                        .with_attribute("sync_timeout_secs", Attribute::optional_int64().with_int_range(0, 86_400))
                        .with_attribute("sync_poll_interval_ms", Attribute::optional_int64().with_int_range(1, 3_600_000))
                        .with_description("Change-token retry settings"),
                ),
            )
            .with_block(
                "kinesis",
                NestedBlock::single(
                    Block::new()
                        .with_attribute("create_timeout_secs", Attribute::optional_int64().with_int_range(1, 86_400))
                        .with_attribute("update_timeout_secs", Attribute::optional_int64().with_int_range(1, 86_400))
                        .with_attribute("delete_timeout_secs", Attribute::optional_int64().with_int_range(1, 86_400))
                        .with_attribute("poll_interval_ms", Attribute::optional_int64().with_int_range(1, 3_600_000)),
                ),
            )
            .with_block(
                "sns",
                NestedBlock::single(
                    Block::new()
                        .with_attribute("policy_max_attempts", Attribute::optional_int64().with_int_range(1, 100))
                        .with_attribute("policy_initial_backoff_ms", Attribute::optional_int64().with_int_range(0, 3_600_000))
                        .with_attribute("policy_max_backoff_ms", Attribute::optional_int64().with_int_range(0, 3_600_000)),
                ),
            )
    }
}

/// Settings for the WAF change-token retrier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WafSettings {
    /// Attempts per mutation, including the first.
    pub max_attempts: u32,
    /// Backoff after the first conflict.
    pub initial_backoff_ms: u64,
    /// Backoff ceiling.
    pub max_backoff_ms: u64,
    /// Wall-clock budget for one mutation's retry loop.
    pub deadline_secs: u64,
    /// How long to wait for a used token to reach `INSYNC`. `None` skips the wait.
    pub sync_timeout_secs: Option<u64>,
    /// Interval between change-token status polls.
    pub sync_poll_interval_ms: u64,
}

impl Default for WafSettings {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            deadline_secs: 900,
            sync_timeout_secs: Some(300),
            sync_poll_interval_ms: 2_000,
        }
    }
}

impl WafSettings {
    /// Retry policy for change-token conflicts.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
        .with_deadline(Duration::from_secs(self.deadline_secs))
    }

    /// Timeout for the post-mutation `INSYNC` wait, if enabled.
    pub fn sync_timeout(&self) -> Option<Duration> {
        self.sync_timeout_secs.map(Duration::from_secs)
    }

    /// Poll interval for change-token status.
    pub fn sync_poll_interval(&self) -> Duration {
        Duration::from_millis(self.sync_poll_interval_ms)
    }
}

/// Timeouts for Kinesis stream state transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KinesisSettings {
    /// Wait for `ACTIVE` after creation.
    pub create_timeout_secs: u64,
    /// Wait for `ACTIVE` after each update call.
    pub update_timeout_secs: u64,
    /// Wait for the stream to disappear after deletion.
    pub delete_timeout_secs: u64,
    /// Interval between describe calls.
    pub poll_interval_ms: u64,
}

impl Default for KinesisSettings {
    fn default() -> Self {
        Self {
            create_timeout_secs: 300,
            update_timeout_secs: 300,
            delete_timeout_secs: 300,
            poll_interval_ms: 1_000,
        }
    }
}

impl KinesisSettings {
    /// Create timeout.
    pub fn create_timeout(&self) -> Duration {
        Duration::from_secs(self.create_timeout_secs)
    }

    /// Update timeout.
    pub fn update_timeout(&self) -> Duration {
        Duration::from_secs(self.update_timeout_secs)
    }

    /// Delete timeout.
    pub fn delete_timeout(&self) -> Duration {
        Duration::from_secs(self.delete_timeout_secs)
    }

    /// Poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Retry settings for SNS attribute writes.
///
/// Topic policies that name a freshly created IAM principal are rejected
/// until IAM propagates the principal, so policy writes are retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SnsSettings {
    /// Attempts per policy write.
    pub policy_max_attempts: u32,
    /// Backoff after the first rejection.
    pub policy_initial_backoff_ms: u64,
    /// Backoff ceiling.
    pub policy_max_backoff_ms: u64,
}

impl Default for SnsSettings {
    fn default() -> Self {
        Self {
            policy_max_attempts: 8,
            policy_initial_backoff_ms: 1_000,
            policy_max_backoff_ms: 16_000,
        }
    }
}

impl SnsSettings {
    /// Retry policy for policy attribute writes.
    pub fn policy_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.policy_max_attempts,
            Duration::from_millis(self.policy_initial_backoff_ms),
            Duration::from_millis(self.policy_max_backoff_ms),
        )
    }
}
