//! In-memory SNS.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use super::{lock, ACCOUNT_ID, REGION};
use crate::error::ApiError;
use crate::sns::{compact, SnsApi, DELIVERY_POLICY, DISPLAY_NAME, POLICY};

const NOT_FOUND: &str = "NotFound";
const INVALID_PARAMETER: &str = "InvalidParameter";

/// Fake SNS endpoint.
///
/// New topics get the same default access policy AWS attaches. Policies
/// are stored compacted, the way AWS reformats them. A principal registered
/// with [`reject_principal`](Self::reject_principal) makes policy writes
/// that mention it fail, imitating IAM propagation delay.
#[derive(Debug, Default)]
pub struct FakeSns {
    topics: Mutex<BTreeMap<String, HashMap<String, String>>>,
    rejected: Mutex<HashMap<String, u32>>,
    policy_rejections: AtomicU32,
}

impl FakeSns {
    /// An empty SNS.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `times` policy writes that mention `principal`.
    pub fn reject_principal(&self, principal: &str, times: u32) {
        lock(&self.rejected).insert(principal.to_string(), times);
    }

    /// Policy writes rejected so far.
    pub fn policy_rejections(&self) -> u32 {
        self.policy_rejections.load(Ordering::SeqCst)
    }

    /// A topic's attributes, or `None` if it does not exist.
    pub fn attributes(&self, arn: &str) -> Option<HashMap<String, String>> {
        lock(&self.topics).get(arn).cloned()
    }

    fn check_principals(&self, policy: &str) -> Result<(), ApiError> {
        let mut rejected = lock(&self.rejected);
        let pending = rejected
            .iter_mut()
            .find(|(principal, remaining)| **remaining > 0 && policy.contains(principal.as_str()));
        if let Some((_, remaining)) = pending {
            *remaining = remaining.saturating_sub(1);
            self.policy_rejections.fetch_add(1, Ordering::SeqCst);
            return Err(ApiError::new(
                INVALID_PARAMETER,
                "Invalid parameter: Policy Error: PrincipalNotFound",
            ));
        }
        Ok(())
    }
}

fn default_policy(arn: &str) -> String {
    json!({
        "Version": "2008-10-17",
        "Id": "__default_policy_ID",
        "Statement": [{
            "Sid": "__default_statement_ID",
            "Effect": "Allow",
            "Principal": {"AWS": "*"},
            "Action": [
                "SNS:GetTopicAttributes",
                "SNS:SetTopicAttributes",
                "SNS:AddPermission",
                "SNS:RemovePermission",
                "SNS:DeleteTopic",
                "SNS:Subscribe",
                "SNS:ListSubscriptionsByTopic",
                "SNS:Publish"
            ],
            "Resource": arn,
            "Condition": {"StringEquals": {"AWS:SourceOwner": ACCOUNT_ID}}
        }]
    })
    .to_string()
}

#[async_trait]
impl SnsApi for FakeSns {
    async fn create_topic(&self, name: &str) -> Result<String, ApiError> {
        if name.is_empty() || name.len() > 256 {
            return Err(ApiError::new(INVALID_PARAMETER, "Invalid parameter: Topic Name"));
        }
        let arn = format!("arn:aws:sns:{}:{}:{}", REGION, ACCOUNT_ID, name);
        lock(&self.topics).entry(arn.clone()).or_insert_with(|| {
            HashMap::from([
                ("TopicArn".to_string(), arn.clone()),
                (DISPLAY_NAME.to_string(), String::new()),
                (POLICY.to_string(), default_policy(&arn)),
                ("Owner".to_string(), ACCOUNT_ID.to_string()),
            ])
        });
        Ok(arn)
    }

    async fn get_topic_attributes(&self, arn: &str) -> Result<HashMap<String, String>, ApiError> {
        self.attributes(arn)
            .ok_or_else(|| ApiError::not_found(NOT_FOUND, format!("Topic {}", arn)))
    }

    async fn set_topic_attribute(
        &self,
        arn: &str,
        name: &str,
        value: &str,
    ) -> Result<(), ApiError> {
        if !lock(&self.topics).contains_key(arn) {
            return Err(ApiError::not_found(NOT_FOUND, format!("Topic {}", arn)));
        }

        let stored = match name {
            POLICY | DELIVERY_POLICY if !value.is_empty() => {
                let compacted = compact(value).ok_or_else(|| {
                    ApiError::new(
                        INVALID_PARAMETER,
                        format!("Invalid parameter: {}: failed to parse JSON", name),
                    )
                })?;
                if name == POLICY {
                    self.check_principals(&compacted)?;
                }
                compacted
            },
            DISPLAY_NAME | POLICY | DELIVERY_POLICY => value.to_string(),
            other => {
                return Err(ApiError::new(
                    INVALID_PARAMETER,
                    format!("Invalid parameter: AttributeName {}", other),
                ))
            },
        };

        let mut topics = lock(&self.topics);
        let attrs = topics
            .get_mut(arn)
            .ok_or_else(|| ApiError::not_found(NOT_FOUND, format!("Topic {}", arn)))?;
        if stored.is_empty() && name != DISPLAY_NAME {
            attrs.remove(name);
        } else {
            attrs.insert(name.to_string(), stored);
        }
        Ok(())
    }

    async fn delete_topic(&self, arn: &str) -> Result<(), ApiError> {
        // Deleting a missing topic succeeds, as in SNS.
        lock(&self.topics).remove(arn);
        Ok(())
    }
}
