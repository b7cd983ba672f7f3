//! In-memory Kinesis with stream status transitions.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{lock, ACCOUNT_ID, REGION};
use crate::error::ApiError;
use crate::kinesis::{KinesisApi, StreamStatus, StreamSummary, DEFAULT_RETENTION_HOURS};

const IN_USE: &str = "ResourceInUseException";
const NOT_FOUND: &str = "ResourceNotFoundException";
const INVALID_ARGUMENT: &str = "InvalidArgumentException";

const MAX_RETENTION_HOURS: i64 = 8760;

#[derive(Debug)]
struct FakeStream {
    summary: StreamSummary,
    tags: BTreeMap<String, String>,
    /// Describe calls left before the current transition completes.
    pending_polls: u32,
}

/// Fake Kinesis endpoint.
///
/// Every mutation puts the stream in a transitional status (`CREATING`,
/// `UPDATING` or `DELETING`) that completes after a configurable number
/// of `DescribeStream` calls. Mutating a stream that is not `ACTIVE` fails
/// with `ResourceInUseException`.
#[derive(Debug)]
pub struct FakeKinesis {
    streams: Mutex<BTreeMap<String, FakeStream>>,
    transition_polls: AtomicU32,
}

impl Default for FakeKinesis {
    fn default() -> Self {
        Self {
            streams: Mutex::default(),
            transition_polls: AtomicU32::new(1),
        }
    }
}

impl FakeKinesis {
    /// An empty Kinesis whose transitions finish on the first describe.
    pub fn new() -> Self {
        Self::default()
    }

    /// Describe calls each future transition takes to complete.
    pub fn set_transition_polls(&self, polls: u32) {
        self.transition_polls.store(polls, Ordering::SeqCst);
    }

    /// A stream as stored, without advancing its transition.
    pub fn stream(&self, name: &str) -> Option<StreamSummary> {
        lock(&self.streams).get(name).map(|s| s.summary.clone())
    }

    /// Drop a stream immediately, as if deleted out of band.
    pub fn remove_stream(&self, name: &str) {
        lock(&self.streams).remove(name);
    }

    /// Run `f` on an `ACTIVE` stream, then start an `UPDATING` transition.
    fn mutate<F>(&self, name: &str, f: F) -> Result<(), ApiError>
    where
        F: FnOnce(&mut StreamSummary) -> Result<(), ApiError>,
    {
        let polls = self.transition_polls.load(Ordering::SeqCst);
        let mut streams = lock(&self.streams);
        let stream = active(&mut streams, name)?;
        f(&mut stream.summary)?;
        stream.summary.status = StreamStatus::Updating;
        stream.pending_polls = polls;
        Ok(())
    }
}

fn not_found(name: &str) -> ApiError {
    ApiError::not_found(
        NOT_FOUND,
        format!("Stream {} under account {}", name, ACCOUNT_ID),
    )
}

fn active<'a>(
    streams: &'a mut BTreeMap<String, FakeStream>,
    name: &str,
) -> Result<&'a mut FakeStream, ApiError> {
    let stream = streams.get_mut(name).ok_or_else(|| not_found(name))?;
    if stream.summary.status != StreamStatus::Active {
        return Err(ApiError::new(
            IN_USE,
            format!("Stream {} is currently {}", name, stream.summary.status),
        ));
    }
    Ok(stream)
}

#[async_trait]
impl KinesisApi for FakeKinesis {
    async fn create_stream(&self, name: &str, shard_count: i64) -> Result<(), ApiError> {
        let polls = self.transition_polls.load(Ordering::SeqCst);
        let mut streams = lock(&self.streams);
        if streams.contains_key(name) {
            return Err(ApiError::new(
                IN_USE,
                format!("Stream {} under account {} already exists", name, ACCOUNT_ID),
            ));
        }
        if shard_count < 1 {
            return Err(ApiError::new(INVALID_ARGUMENT, "ShardCount must be at least 1"));
        }

        let summary = StreamSummary {
            name: name.to_string(),
            arn: format!("arn:aws:kinesis:{}:{}:stream/{}", REGION, ACCOUNT_ID, name),
            status: StreamStatus::Creating,
            shard_count,
            retention_period_hours: DEFAULT_RETENTION_HOURS,
            shard_level_metrics: Vec::new(),
        };
        streams.insert(
            name.to_string(),
            FakeStream {
                summary,
                tags: BTreeMap::new(),
                pending_polls: polls,
            },
        );
        Ok(())
    }

    async fn describe_stream(&self, name: &str) -> Result<StreamSummary, ApiError> {
        let mut streams = lock(&self.streams);
        let stream = streams.get_mut(name).ok_or_else(|| not_found(name))?;

        if stream.summary.status != StreamStatus::Active {
            stream.pending_polls = stream.pending_polls.saturating_sub(1);
            if stream.pending_polls == 0 {
                if stream.summary.status == StreamStatus::Deleting {
                    streams.remove(name);
                    return Err(not_found(name));
                }
                stream.summary.status = StreamStatus::Active;
            }
        }
        Ok(stream.summary.clone())
    }

    async fn update_shard_count(&self, name: &str, target: i64) -> Result<(), ApiError> {
        self.mutate(name, |summary| {
            if target < 1 || target > summary.shard_count * 2 {
                return Err(ApiError::new(
                    INVALID_ARGUMENT,
                    format!("TargetShardCount {} is out of range", target),
                ));
            }
            summary.shard_count = target;
            Ok(())
        })
    }

    async fn increase_retention_period(&self, name: &str, hours: i64) -> Result<(), ApiError> {
        self.mutate(name, |summary| {
            if hours <= summary.retention_period_hours || hours > MAX_RETENTION_HOURS {
                return Err(ApiError::new(
                    INVALID_ARGUMENT,
                    format!(
                        "Requested retention period ({} hours) must be greater than the current ({} hours)",
                        hours, summary.retention_period_hours
                    ),
                ));
            }
            summary.retention_period_hours = hours;
            Ok(())
        })
    }

    async fn decrease_retention_period(&self, name: &str, hours: i64) -> Result<(), ApiError> {
        self.mutate(name, |summary| {
            if hours >= summary.retention_period_hours || hours < DEFAULT_RETENTION_HOURS {
                return Err(ApiError::new(
                    INVALID_ARGUMENT,
                    format!(
                        "Requested retention period ({} hours) must be less than the current ({} hours)",
                        hours, summary.retention_period_hours
                    ),
                ));
            }
            summary.retention_period_hours = hours;
            Ok(())
        })
    }

    async fn enable_enhanced_monitoring(&self, name: &str, metrics: &[String]) -> Result<(), ApiError> {
        self.mutate(name, |summary| {
            let mut enabled: BTreeSet<String> = summary.shard_level_metrics.drain(..).collect();
            enabled.extend(metrics.iter().cloned());
            summary.shard_level_metrics = enabled.into_iter().collect();
            Ok(())
        })
    }

    async fn disable_enhanced_monitoring(
        &self,
        name: &str,
        metrics: &[String],
    ) -> Result<(), ApiError> {
        self.mutate(name, |summary| {
            summary.shard_level_metrics.retain(|m| !metrics.contains(m));
            Ok(())
        })
    }

    async fn list_tags(&self, name: &str) -> Result<BTreeMap<String, String>, ApiError> {
        lock(&self.streams)
            .get(name)
            .map(|s| s.tags.clone())
            .ok_or_else(|| not_found(name))
    }

    async fn add_tags(&self, name: &str, tags: &BTreeMap<String, String>) -> Result<(), ApiError> {
        let mut streams = lock(&self.streams);
        let stream = streams.get_mut(name).ok_or_else(|| not_found(name))?;
        stream.tags.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn remove_tags(&self, name: &str, keys: &[String]) -> Result<(), ApiError> {
        let mut streams = lock(&self.streams);
        let stream = streams.get_mut(name).ok_or_else(|| not_found(name))?;
        for key in keys {
            stream.tags.remove(key);
        }
        Ok(())
    }

    async fn delete_stream(&self, name: &str) -> Result<(), ApiError> {
        let polls = self.transition_polls.load(Ordering::SeqCst);
        let mut streams = lock(&self.streams);
        let stream = streams.get_mut(name).ok_or_else(|| not_found(name))?;
        if stream.summary.status == StreamStatus::Deleting {
            return Ok(());
        }
        stream.summary.status = StreamStatus::Deleting;
        stream.pending_polls = polls;
        Ok(())
    }
}
