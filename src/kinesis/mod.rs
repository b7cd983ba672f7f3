//! Amazon Kinesis data streams.

mod api;
mod stream;

pub use api::{KinesisApi, StreamStatus, StreamSummary};
pub use stream::{KinesisStreamResource, DEFAULT_RETENTION_HOURS};
