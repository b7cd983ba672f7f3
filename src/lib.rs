//! Hemmer provider for AWS WAF, Kinesis and SNS
//!
//! This crate implements four resources on the provider side of the
//! Hemmer plan/apply boundary:
//!
//! - `aws_waf_size_constraint_set` and `aws_waf_rule`, whose every mutation
//!   is guarded by a WAF change token
//! - `aws_kinesis_stream`, which waits out stream status transitions
//! - `aws_sns_topic`, including access-policy equivalence and IAM
//!   propagation retries
//!
//! # Change tokens
//!
//! Classic WAF serialises writers with single-use change tokens. Each
//! mutation fetches a token, performs the call with it and, if another writer
//! got there first, fetches a new one and tries again. [`WafRetryer`]
//! implements that loop on top of the generic [`retry::retry_with_backoff`].
//!
//! # Structure
//!
//! - [`AwsProvider`] implements [`ProviderService`] and dispatches each call
//!   to the registered [`resource::Resource`].
//! - Resources talk to AWS only through the [`waf::WafApi`],
//!   [`kinesis::KinesisApi`] and [`sns::SnsApi`] traits, bundled in
//!   [`AwsClients`]. The `aws` feature provides SDK-backed implementations;
//!   [`testing`] provides in-memory ones.
//! - Each operation receives a [`resource::ProviderContext`] holding the
//!   configuration snapshot and the clients.
//!
//! # Quick Start
//!
//! ```
//! use hemmer_provider_aws::testing::{fast_config, FakeClients};
//! use hemmer_provider_aws::{AwsProvider, ProviderService};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let provider = AwsProvider::new(FakeClients::new().clients(), fast_config());
//!
//! let plan = provider
//!     .plan("aws_kinesis_stream", None, json!({"name": "events", "shard_count": 2}), json!({}))
//!     .await
//!     .unwrap();
//! let state = provider.create("aws_kinesis_stream", plan.planned_state).await.unwrap();
//! assert_eq!(state["retention_period"], 24);
//! # });
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod kinesis;
pub mod logging;
pub mod plan;
pub mod provider;
pub mod resource;
pub mod retry;
pub mod schema;
pub mod service;
pub mod sns;
pub mod testing;
pub mod types;
pub mod validation;
pub mod waf;

#[cfg(feature = "aws")]
pub mod aws;

// Re-export main types at crate root
pub use config::ProviderConfig;
pub use error::{ApiError, ApiErrorKind, ProviderError};
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::AwsProvider;
pub use resource::AwsClients;
pub use schema::ProviderSchema;
pub use service::ProviderService;
pub use types::{AttributeChange, ImportedResource, PlanResult, ProviderMetadata};
pub use validation::{is_valid, validate, validate_result};
pub use waf::{WafError, WafRetryer};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tracing;
