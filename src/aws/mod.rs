//! Service clients backed by the official AWS SDK.
//!
//! Enabled with the `aws` feature. Credentials and endpoints come from the
//! standard provider chain (`AWS_PROFILE`, environment, IMDS, ...); the
//! region comes from the provider configuration.
//!
//! ```ignore
//! use hemmer_provider_aws::{AwsClients, AwsProvider, ProviderConfig};
//!
//! let config = ProviderConfig::default();
//! let clients = AwsClients::load(&config).await;
//! let provider = AwsProvider::new(clients, config);
//! ```

mod kinesis;
mod sns;
mod waf;

pub use kinesis::SdkKinesis;
pub use sns::SdkSns;
pub use waf::SdkWaf;

use std::fmt::Display;
use std::sync::Arc;

use aws_config::{BehaviorVersion, Region};
use aws_sdk_waf::error::ProvideErrorMetadata;
use tracing::info;

use crate::config::ProviderConfig;
use crate::error::ApiError;
use crate::resource::AwsClients;

/// Global WAF is only served from this region.
const WAF_REGION: &str = "us-east-1";

impl AwsClients {
    /// Build SDK clients for the region in `config`.
    pub async fn load(config: &ProviderConfig) -> Self {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;
        info!(region = %config.region, "Loaded AWS configuration");

        let waf_config = aws_sdk_waf::config::Builder::from(&shared)
            .region(Region::new(WAF_REGION))
            .build();

        Self {
            waf: Arc::new(SdkWaf::new(aws_sdk_waf::Client::from_conf(waf_config))),
            kinesis: Arc::new(SdkKinesis::new(aws_sdk_kinesis::Client::new(&shared))),
            sns: Arc::new(SdkSns::new(aws_sdk_sns::Client::new(&shared))),
        }
    }
}

/// Classify an SDK failure by its service error code.
///
/// Transport and timeout failures carry no code and classify as `Other`.
pub(crate) fn api_error<E>(err: E) -> ApiError
where
    E: ProvideErrorMetadata + Display,
{
    let code = err.code().unwrap_or("Unknown").to_string();
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| err.to_string());
    ApiError::new(code, message)
}

/// A response that lacked a field the service always returns.
pub(crate) fn missing(field: &str) -> ApiError {
    ApiError::new("MissingField", format!("response has no {}", field))
}

/// A request the SDK refused to build.
pub(crate) fn invalid_request(err: impl Display) -> ApiError {
    ApiError::new("ValidationException", err.to_string())
}
