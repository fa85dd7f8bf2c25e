use async_trait::async_trait;

use super::types::{Permission, SubscribeOptions, Subscription};
use crate::Result;

/// The platform push service, reached through the active registration.
#[async_trait]
pub trait PushPlatform: Send + Sync {
    /// Current permission without prompting.
    async fn permission(&self) -> Result<Permission>;

    /// Prompt the user. Resolves to the permission they left in place.
    async fn request_permission(&self) -> Result<Permission>;

    async fn subscribe(&self, options: &SubscribeOptions) -> Result<Subscription>;

    async fn get_subscription(&self) -> Result<Option<Subscription>>;

    /// Cancel the live subscription. `false` when there was none.
    async fn unsubscribe(&self) -> Result<bool>;
}

/// Backend side of the subscription handshake.
#[async_trait]
pub trait PushBackend: Send + Sync {
    /// Base64url VAPID public key.
    async fn vapid_public_key(&self) -> Result<String>;

    async fn register_subscription(&self, subscription: &Subscription) -> Result<()>;

    async fn remove_subscription(&self, subscription: &Subscription) -> Result<()>;

    async fn send_test(&self) -> Result<()>;
}
