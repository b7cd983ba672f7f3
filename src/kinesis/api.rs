//! The Kinesis control-plane operations the stream resource needs.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;

use crate::error::ApiError;

/// Lifecycle state of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamStatus {
    /// Being created.
    Creating,
    /// Being resharded, retagged or reconfigured.
    Updating,
    /// Ready for use and for further mutations.
    Active,
    /// Being deleted.
    Deleting,
}

impl StreamStatus {
    /// Parse the API's status string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATING" => Some(Self::Creating),
            "UPDATING" => Some(Self::Updating),
            "ACTIVE" => Some(Self::Active),
            "DELETING" => Some(Self::Deleting),
            _ => None,
        }
    }

    /// The API's status string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "CREATING",
            Self::Updating => "UPDATING",
            Self::Active => "ACTIVE",
            Self::Deleting => "DELETING",
        }
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What `DescribeStreamSummary` reports about a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    /// Stream name.
    pub name: String,
    /// Stream ARN.
    pub arn: String,
    /// Current lifecycle state.
    pub status: StreamStatus,
    /// Number of open shards.
    pub shard_count: i64,
    /// How long records are kept.
    pub retention_period_hours: i64,
    /// Enabled enhanced monitoring metrics.
    pub shard_level_metrics: Vec<String>,
}

/// Kinesis control-plane client.
///
/// Streams are addressed by name. Mutations are only accepted while the
/// stream is `ACTIVE`.
#[async_trait]
pub trait KinesisApi: Send + Sync {
    /// Start creating a stream.
    async fn create_stream(&self, name: &str, shard_count: i64) -> Result<(), ApiError>;

    /// Describe a stream.
    async fn describe_stream(&self, name: &str) -> Result<StreamSummary, ApiError>;

    /// Reshard uniformly to `target` open shards.
    async fn update_shard_count(&self, name: &str, target: i64) -> Result<(), ApiError>;

    /// Raise the retention period.
    async fn increase_retention_period(&self, name: &str, hours: i64) -> Result<(), ApiError>;

    /// Lower the retention period.
    async fn decrease_retention_period(&self, name: &str, hours: i64) -> Result<(), ApiError>;

    /// Turn on shard-level metrics.
    async fn enable_enhanced_monitoring(&self, name: &str, metrics: &[String])
        -> Result<(), ApiError>;

    /// Turn off shard-level metrics.
    async fn disable_enhanced_monitoring(
        &self,
        name: &str,
        metrics: &[String],
    ) -> Result<(), ApiError>;

    /// All tags on a stream.
    async fn list_tags(&self, name: &str) -> Result<BTreeMap<String, String>, ApiError>;

    /// Add or overwrite tags.
    async fn add_tags(&self, name: &str, tags: &BTreeMap<String, String>) -> Result<(), ApiError>;

    /// Remove tags by key.
    async fn remove_tags(&self, name: &str, keys: &[String]) -> Result<(), ApiError>;

    /// Start deleting a stream.
    async fn delete_stream(&self, name: &str) -> Result<(), ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        for status in [
            StreamStatus::Creating,
            StreamStatus::Updating,
            StreamStatus::Active,
            StreamStatus::Deleting,
        ] {
            assert_eq!(StreamStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(StreamStatus::parse("active"), None);
        assert_eq!(StreamStatus::Active.to_string(), "ACTIVE");
    }
}
