//! Push subscription negotiation.
//!
//! # Module Structure
//!
//! - [`manager`] - Subscription lifecycle across platform and backend
//! - [`platform`] - Traits for the platform push service and the backend broker
//! - [`key`] - VAPID public key decoding
//! - [`types`] - Subscription, permission and status types

mod key;
mod manager;
mod platform;
mod types;

pub use key::url_base64_to_bytes;
pub use manager::PushManager;
pub use platform::{PushBackend, PushPlatform};
pub use types::{
    Permission, PushSnapshot, SubscribeOptions, Subscription, SubscriptionKeys,
    SubscriptionStatus,
};
