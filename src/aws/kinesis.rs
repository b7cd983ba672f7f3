use std::collections::BTreeMap;

use async_trait::async_trait;
use aws_sdk_kinesis::types::{MetricsName, ScalingType};
use aws_sdk_kinesis::Client;

use super::{api_error, missing};
use crate::error::ApiError;
use crate::kinesis::{KinesisApi, StreamStatus, StreamSummary};

/// [`KinesisApi`] over the regional Kinesis endpoint.
#[derive(Debug, Clone)]
pub struct SdkKinesis {
    client: Client,
}

impl SdkKinesis {
    /// Wrap a Kinesis client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn to_i32(value: i64, what: &str) -> Result<i32, ApiError> {
    i32::try_from(value)
        .map_err(|_| ApiError::new("InvalidArgumentException", format!("{} {} is out of range", what, value)))
}

fn metric_names(metrics: &[String]) -> Vec<MetricsName> {
    metrics.iter().map(|m| MetricsName::from(m.as_str())).collect()
}

#[async_trait]
impl KinesisApi for SdkKinesis {
    async fn create_stream(&self, name: &str, shard_count: i64) -> Result<(), ApiError> {
        self.client
            .create_stream()
            .stream_name(name)
            .shard_count(to_i32(shard_count, "ShardCount")?)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn describe_stream(&self, name: &str) -> Result<StreamSummary, ApiError> {
        let out = self
            .client
            .describe_stream_summary()
            .stream_name(name)
            .send()
            .await
            .map_err(api_error)?;
        let summary = out
            .stream_description_summary()
            .ok_or_else(|| missing("StreamDescriptionSummary"))?;
        let status = StreamStatus::parse(summary.stream_status().as_str()).ok_or_else(|| {
            ApiError::new(
                "UnknownStatus",
                format!("stream status {}", summary.stream_status().as_str()),
            )
        })?;

        Ok(StreamSummary {
            name: summary.stream_name().to_string(),
            arn: summary.stream_arn().to_string(),
            status,
            shard_count: summary.open_shard_count().into(),
            retention_period_hours: summary.retention_period_hours().into(),
            shard_level_metrics: summary
                .enhanced_monitoring()
                .iter()
                .flat_map(|m| m.shard_level_metrics())
                .map(|m| m.as_str().to_string())
                .collect(),
        })
    }

    async fn update_shard_count(&self, name: &str, target: i64) -> Result<(), ApiError> {
        self.client
            .update_shard_count()
            .stream_name(name)
            .target_shard_count(to_i32(target, "TargetShardCount")?)
            .scaling_type(ScalingType::UniformScaling)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn increase_retention_period(&self, name: &str, hours: i64) -> Result<(), ApiError> {
        self.client
            .increase_stream_retention_period()
            .stream_name(name)
            .retention_period_hours(to_i32(hours, "RetentionPeriodHours")?)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn decrease_retention_period(&self, name: &str, hours: i64) -> Result<(), ApiError> {
        self.client
            .decrease_stream_retention_period()
            .stream_name(name)
            .retention_period_hours(to_i32(hours, "RetentionPeriodHours")?)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn enable_enhanced_monitoring(&self, name: &str, metrics: &[String]) -> Result<(), ApiError> {
        self.client
            .enable_enhanced_monitoring()
            .stream_name(name)
            .set_shard_level_metrics(Some(metric_names(metrics)))
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn disable_enhanced_monitoring(
        &self,
        name: &str,
        metrics: &[String],
    ) -> Result<(), ApiError> {
        self.client
            .disable_enhanced_monitoring()
            .stream_name(name)
            .set_shard_level_metrics(Some(metric_names(metrics)))
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn list_tags(&self, name: &str) -> Result<BTreeMap<String, String>, ApiError> {
        let mut tags = BTreeMap::new();
        let mut start: Option<String> = None;
        loop {
            let out = self
                .client
                .list_tags_for_stream()
                .stream_name(name)
                .set_exclusive_start_tag_key(start.take())
                .send()
                .await
                .map_err(api_error)?;
            for tag in out.tags() {
                tags.insert(tag.key().to_string(), tag.value().unwrap_or_default().to_string());
            }
            if !out.has_more_tags() {
                return Ok(tags);
            }
            match out.tags().last() {
                Some(last) => start = Some(last.key().to_string()),
                None => return Ok(tags),
            }
        }
    }

    async fn add_tags(&self, name: &str, tags: &BTreeMap<String, String>) -> Result<(), ApiError> {
        self.client
            .add_tags_to_stream()
            .stream_name(name)
            .set_tags(Some(tags.iter().map(|(k, v)| (k.clone(), v.clone())).collect()))
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn remove_tags(&self, name: &str, keys: &[String]) -> Result<(), ApiError> {
        self.client
            .remove_tags_from_stream()
            .stream_name(name)
            .set_tag_keys(Some(keys.to_vec()))
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn delete_stream(&self, name: &str) -> Result<(), ApiError> {
        self.client
            .delete_stream()
            .stream_name(name)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }
}
