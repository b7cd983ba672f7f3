//! The SNS control-plane operations the topic resource needs.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::ApiError;

/// `DisplayName` topic attribute.
pub const DISPLAY_NAME: &str = "DisplayName";
/// `Policy` topic attribute.
pub const POLICY: &str = "Policy";
/// `DeliveryPolicy` topic attribute.
pub const DELIVERY_POLICY: &str = "DeliveryPolicy";

/// SNS control-plane client. Topics are addressed by ARN.
#[async_trait]
pub trait SnsApi: Send + Sync {
    /// Create a topic, or return the ARN of an existing one with this name.
    async fn create_topic(&self, name: &str) -> Result<String, ApiError>;

    /// All attributes of a topic.
    async fn get_topic_attributes(&self, arn: &str) -> Result<HashMap<String, String>, ApiError>;

    /// Set one attribute. An empty value clears it.
    async fn set_topic_attribute(&self, arn: &str, name: &str, value: &str)
        -> Result<(), ApiError>;

    /// Delete a topic.
    async fn delete_topic(&self, arn: &str) -> Result<(), ApiError>;
}
