use serde::{Deserialize, Serialize};

use crate::error::ErrorPayload;

/// Capability token routing pushes to one background context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub endpoint: String,
    #[serde(default)]
    pub expiration_time: Option<i64>,
    pub keys: SubscriptionKeys,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    #[default]
    Default,
    Granted,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubscriptionStatus {
    #[default]
    Unsubscribed,
    PermissionPending,
    Subscribing,
    Subscribed,
    Unsubscribing,
}

impl SubscriptionStatus {
    pub fn is_transitional(self) -> bool {
        matches!(
            self,
            SubscriptionStatus::PermissionPending
                | SubscriptionStatus::Subscribing
                | SubscriptionStatus::Unsubscribing
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub user_visible_only: bool,
    /// Decoded VAPID public key.
    pub application_server_key: Vec<u8>,
}

/// Point-in-time view of the push state for display.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSnapshot {
    pub status: SubscriptionStatus,
    pub permission: Permission,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<ErrorPayload>,
}
