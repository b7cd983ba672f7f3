//! Amazon SNS topics.

mod api;
mod policy;
mod topic;

pub use api::{SnsApi, DELIVERY_POLICY, DISPLAY_NAME, POLICY};
pub(crate) use policy::compact;
pub use policy::policies_equivalent;
pub use topic::SnsTopicResource;
