use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_sns::Client;

use super::{api_error, missing};
use crate::error::ApiError;
use crate::sns::SnsApi;

/// [`SnsApi`] over the regional SNS endpoint.
#[derive(Debug, Clone)]
pub struct SdkSns {
    client: Client,
}

impl SdkSns {
    /// Wrap an SNS client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SnsApi for SdkSns {
    async fn create_topic(&self, name: &str) -> Result<String, ApiError> {
        let out = self
            .client
            .create_topic()
            .name(name)
            .send()
            .await
            .map_err(api_error)?;
        out.topic_arn()
            .map(str::to_string)
            .ok_or_else(|| missing("TopicArn"))
    }

    async fn get_topic_attributes(&self, arn: &str) -> Result<HashMap<String, String>, ApiError> {
        let out = self
            .client
            .get_topic_attributes()
            .topic_arn(arn)
            .send()
            .await
            .map_err(api_error)?;
        Ok(out.attributes().cloned().unwrap_or_default())
    }

    async fn set_topic_attribute(
        &self,
        arn: &str,
        name: &str,
        value: &str,
    ) -> Result<(), ApiError> {
        self.client
            .set_topic_attributes()
            .topic_arn(arn)
            .attribute_name(name)
            .attribute_value(value)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn delete_topic(&self, arn: &str) -> Result<(), ApiError> {
        self.client
            .delete_topic()
            .topic_arn(arn)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }
}
