//! `aws_kinesis_stream`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::api::{KinesisApi, StreamStatus, StreamSummary};
use crate::config::KinesisSettings;
use crate::error::{ApiError, ProviderError};
use crate::resource::{
    decode, encode, null_as_default, set_changes, undo_create, ProviderContext, Resource,
};
use crate::retry::poll_until;
use crate::schema::{Attribute, Schema};

/// Retention Kinesis applies when none is requested.
pub const DEFAULT_RETENTION_HOURS: i64 = 24;

const MAX_RETENTION_HOURS: i64 = 8760;

/// Explicit metric names only. AWS reports `ALL` back as the expanded list,
/// so accepting it would never converge.
const SHARD_LEVEL_METRICS: [&str; 7] = [
    "IncomingBytes",
    "IncomingRecords",
    "OutgoingBytes",
    "OutgoingRecords",
    "WriteProvisionedThroughputExceeded",
    "ReadProvisionedThroughputExceeded",
    "IteratorAgeMilliseconds",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StreamState {
    #[serde(default)]
    id: Option<String>,
    name: String,
    shard_count: i64,
    #[serde(default)]
    retention_period: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    shard_level_metrics: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    tags: BTreeMap<String, String>,
    #[serde(default)]
    arn: Option<String>,
}

impl StreamState {
    fn from_remote(summary: StreamSummary, tags: BTreeMap<String, String>) -> Self {
        let mut metrics = summary.shard_level_metrics;
        metrics.sort();
        Self {
            id: Some(summary.arn.clone()),
            name: summary.name,
            shard_count: summary.shard_count,
            retention_period: Some(summary.retention_period_hours),
            shard_level_metrics: metrics,
            tags,
            arn: Some(summary.arn),
        }
    }

    fn retention(&self) -> i64 {
        self.retention_period.unwrap_or(DEFAULT_RETENTION_HOURS)
    }
}

/// Operations on one named stream.
struct Stream<'a> {
    api: &'a dyn KinesisApi,
    settings: &'a KinesisSettings,
    name: &'a str,
}

impl<'a> Stream<'a> {
    fn new(ctx: &'a ProviderContext, name: &'a str) -> Self {
        Self {
            api: ctx.clients.kinesis.as_ref(),
            settings: &ctx.config.kinesis,
            name,
        }
    }

    async fn wait_active(&self, timeout: Duration) -> Result<StreamSummary, ProviderError> {
        let api = self.api;
        let name = self.name;
        poll_until(
            "Kinesis stream ACTIVE",
            self.settings.poll_interval(),
            timeout,
            || async move {
                let summary = api.describe_stream(name).await?;
                debug!(stream = name, status = %summary.status, "Polled Kinesis stream");
                Ok::<_, ApiError>((summary.status == StreamStatus::Active).then_some(summary))
            },
        )
        .await
        .map_err(|e| {
            ProviderError::from(e)
                .with_context(format!("waiting for Kinesis stream ({}) to become available", name))
        })
    }

    async fn wait_gone(&self) -> Result<(), ProviderError> {
        let api = self.api;
        let name = self.name;
        poll_until(
            "Kinesis stream deleted",
            self.settings.poll_interval(),
            self.settings.delete_timeout(),
            || async move {
                match api.describe_stream(name).await {
                    Ok(summary) => {
                        debug!(stream = name, status = %summary.status, "Kinesis stream still present");
                        Ok(None)
                    },
                    Err(e) if e.is_not_found() => Ok(Some(())),
                    Err(e) => Err(e),
                }
            },
        )
        .await
        .map_err(|e| {
            ProviderError::from(e)
                .with_context(format!("waiting for Kinesis stream ({}) to be deleted", name))
        })
    }

    /// Current state, or `None` when the stream is gone or going.
    async fn describe(&self) -> Result<Option<StreamState>, ProviderError> {
        let summary = match self.api.describe_stream(self.name).await {
            Ok(summary) => summary,
            Err(e) if e.is_not_found() => {
                warn!(stream = self.name, "Kinesis stream not found, removing from state");
                return Ok(None);
            },
            Err(e) => return Err(ProviderError::from(e).with_context("reading Kinesis stream")),
        };
        if summary.status == StreamStatus::Deleting {
            warn!(stream = self.name, "Kinesis stream is being deleted, removing from state");
            return Ok(None);
        }

        let tags = self
            .api
            .list_tags(self.name)
            .await
            .map_err(|e| ProviderError::from(e).with_context("listing Kinesis stream tags"))?;
        Ok(Some(StreamState::from_remote(summary, tags)))
    }

    /// Apply every difference between `current` and `desired`.
    async fn converge(&self, current: &StreamState, desired: &StreamState) -> Result<(), ProviderError> {
        let name = self.name;
        let timeout = self.settings.update_timeout();

        if desired.shard_count != current.shard_count {
            info!(stream = name, from = current.shard_count, to = desired.shard_count, "Resharding Kinesis stream");
            self.api
                .update_shard_count(name, desired.shard_count)
                .await
                .map_err(|e| ProviderError::from(e).with_context("updating Kinesis shard count"))?;
            self.wait_active(timeout).await?;
        }

        let (from, to) = (current.retention(), desired.retention());
        if to != from {
            info!(stream = name, from, to, "Changing Kinesis retention period");
            let changed = if to > from {
                self.api.increase_retention_period(name, to).await
            } else {
                self.api.decrease_retention_period(name, to).await
            };
            changed.map_err(|e| ProviderError::from(e).with_context("changing Kinesis retention period"))?;
            self.wait_active(timeout).await?;
        }

        let (disable, enable) = set_changes(&current.shard_level_metrics, &desired.shard_level_metrics);
        if !disable.is_empty() {
            info!(stream = name, metrics = ?disable, "Disabling shard-level metrics");
            self.api
                .disable_enhanced_monitoring(name, &disable)
                .await
                .map_err(|e| ProviderError::from(e).with_context("disabling shard-level metrics"))?;
            self.wait_active(timeout).await?;
        }
        if !enable.is_empty() {
            info!(stream = name, metrics = ?enable, "Enabling shard-level metrics");
            self.api
                .enable_enhanced_monitoring(name, &enable)
                .await
                .map_err(|e| ProviderError::from(e).with_context("enabling shard-level metrics"))?;
            self.wait_active(timeout).await?;
        }

        let removed: Vec<String> = current
            .tags
            .keys()
            .filter(|k| !desired.tags.contains_key(*k))
            .cloned()
            .collect();
        let added: BTreeMap<String, String> = desired
            .tags
            .iter()
            .filter(|(k, v)| current.tags.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if !removed.is_empty() {
            debug!(stream = name, keys = ?removed, "Removing Kinesis stream tags");
            self.api
                .remove_tags(name, &removed)
                .await
                .map_err(|e| ProviderError::from(e).with_context("removing Kinesis stream tags"))?;
        }
        if !added.is_empty() {
            debug!(stream = name, count = added.len(), "Adding Kinesis stream tags");
            self.api
                .add_tags(name, &added)
                .await
                .map_err(|e| ProviderError::from(e).with_context("adding Kinesis stream tags"))?;
        }
        Ok(())
    }

    async fn refreshed(&self) -> Result<Value, ProviderError> {
        match self.describe().await? {
            Some(state) => encode(&state),
            None => Err(ProviderError::NotFound(format!("Kinesis stream {}", self.name))),
        }
    }
}

/// Manages a Kinesis data stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct KinesisStreamResource;

impl KinesisStreamResource {
    /// Resource type name.
    pub const TYPE_NAME: &'static str = "aws_kinesis_stream";
}

#[async_trait]
impl Resource for KinesisStreamResource {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_attribute(
                "name",
                Attribute::required_string().with_force_new().with_max_length(128),
            )
            .with_attribute(
                "shard_count",
                Attribute::required_int64().with_int_range(1, 100_000),
            )
            .with_attribute(
                "retention_period",
                Attribute::optional_int64()
                    .with_default(json!(DEFAULT_RETENTION_HOURS))
                    .with_int_range(DEFAULT_RETENTION_HOURS, MAX_RETENTION_HOURS)
                    .with_description("Hours records stay readable"),
            )
            .with_attribute(
                "shard_level_metrics",
                Attribute::optional_string_set().with_allowed_values(SHARD_LEVEL_METRICS),
            )
            .with_attribute("tags", Attribute::optional_string_map())
            .with_attribute("arn", Attribute::computed_string())
            .with_attribute("id", Attribute::computed_string())
    }

    async fn create(&self, ctx: &ProviderContext, planned: Value) -> Result<Value, ProviderError> {
        let desired: StreamState = decode(planned, Self::TYPE_NAME)?;
        let stream = Stream::new(ctx, &desired.name);

        info!(stream = %desired.name, shards = desired.shard_count, "Creating Kinesis stream");
        stream
            .api
            .create_stream(&desired.name, desired.shard_count)
            .await
            .map_err(|e| ProviderError::from(e).with_context("creating Kinesis stream"))?;

        let finish = async {
            let summary = stream.wait_active(ctx.config.kinesis.create_timeout()).await?;
            info!(stream = %desired.name, arn = %summary.arn, "Kinesis stream active");

            let created = StreamState::from_remote(summary, BTreeMap::new());
            stream.converge(&created, &desired).await?;
            stream.refreshed().await
        };

        match finish.await {
            Ok(created) => Ok(created),
            Err(err) => Err(undo_create(self, ctx, encode(&desired)?, err).await),
        }
    }

    async fn read(&self, ctx: &ProviderContext, current: Value) -> Result<Option<Value>, ProviderError> {
        let state: StreamState = decode(current, Self::TYPE_NAME)?;
        match Stream::new(ctx, &state.name).describe().await? {
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
        let prior: StreamState = decode(prior, Self::TYPE_NAME)?;
        let desired: StreamState = decode(planned, Self::TYPE_NAME)?;
        let stream = Stream::new(ctx, &prior.name);

        stream.converge(&prior, &desired).await?;
        stream.refreshed().await
    }

    async fn delete(&self, ctx: &ProviderContext, current: Value) -> Result<(), ProviderError> {
        let state: StreamState = decode(current, Self::TYPE_NAME)?;
        let stream = Stream::new(ctx, &state.name);

        info!(stream = %state.name, "Deleting Kinesis stream");
        match stream.api.delete_stream(&state.name).await {
            Ok(()) => {},
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(ProviderError::from(e).with_context("deleting Kinesis stream")),
        }
        stream.wait_gone().await
    }

    async fn import(&self, ctx: &ProviderContext, id: &str) -> Result<Option<Value>, ProviderError> {
        match Stream::new(ctx, id).describe().await? {
            Some(state) => Ok(Some(encode(&state)?)),
            None => Ok(None),
        }
    }
}
