use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::key::url_base64_to_bytes;
use super::platform::{PushBackend, PushPlatform};
use super::types::{Permission, PushSnapshot, SubscribeOptions, Subscription, SubscriptionStatus};
use crate::error::ErrorPayload;
use crate::registration::RegistrationState;
use crate::{PrestoError, Result};

#[derive(Debug, Default)]
struct PushState {
    status: SubscriptionStatus,
    permission: Permission,
    subscription: Option<Subscription>,
    last_failure: Option<ErrorPayload>,
}

/// Negotiates the push subscription between the platform and the backend.
///
/// Overlapping calls are not queued: an operation that finds another one in
/// progress fails with [`PrestoError::SubscriptionState`].
pub struct PushManager {
    platform: Arc<dyn PushPlatform>,
    backend: Arc<dyn PushBackend>,
    registration: watch::Receiver<RegistrationState>,
    state: Mutex<PushState>,
}

impl PushManager {
    pub fn new(
        platform: Arc<dyn PushPlatform>,
        backend: Arc<dyn PushBackend>,
        registration: watch::Receiver<RegistrationState>,
    ) -> Self {
        Self {
            platform,
            backend,
            registration,
            state: Mutex::new(PushState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PushState> {
        // State updates never panic mid-way, so a poisoned guard is still consistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_status(&self, status: SubscriptionStatus) {
        let mut state = self.lock();
        debug!(from = ?state.status, to = ?status, "Push status");
        state.status = status;
    }

    fn record_failure(&self, err: &PrestoError) {
        self.lock().last_failure = Some(err.to_payload());
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.lock().status
    }

    /// Most recent expected failure, with remediation text for the user.
    pub fn last_failure(&self) -> Option<ErrorPayload> {
        self.lock().last_failure.clone()
    }

    pub fn snapshot(&self) -> PushSnapshot {
        let state = self.lock();
        PushSnapshot {
            status: state.status,
            permission: state.permission,
            endpoint: state.subscription.as_ref().map(|s| s.endpoint.clone()),
            last_failure: state.last_failure.clone(),
        }
    }

    /// Subscribe this device to pushes and persist the subscription.
    ///
    /// `Ok(false)` when registration is not active or permission is not
    /// granted; the reason is available from [`PushManager::last_failure`].
    pub async fn subscribe(&self) -> Result<bool> {
        if !self.registration.borrow().is_active() {
            let err = PrestoError::SubscriptionState(
                "background registration is not active".to_string(),
            );
            warn!(error = %err, "Push subscribe skipped");
            self.record_failure(&err);
            return Ok(false);
        }

        {
            let mut state = self.lock();
            if state.status == SubscriptionStatus::Subscribed {
                debug!("Already subscribed");
                return Ok(true);
            }
            if state.status.is_transitional() {
                return Err(PrestoError::SubscriptionState(format!(
                    "cannot subscribe while {:?}",
                    state.status
                )));
            }
            // Claimed before the first await so overlapping calls see it.
            state.status = SubscriptionStatus::Subscribing;
        }

        match self.negotiate().await {
            Ok(Some(subscription)) => {
                info!(endpoint = %subscription.endpoint, "Push subscription active");
                let mut state = self.lock();
                state.status = SubscriptionStatus::Subscribed;
                state.subscription = Some(subscription);
                state.last_failure = None;
                Ok(true)
            }
            Ok(None) => {
                self.set_status(SubscriptionStatus::Unsubscribed);
                Ok(false)
            }
            Err(err) => {
                warn!(error = %err, "Push subscribe failed");
                self.record_failure(&err);
                self.set_status(SubscriptionStatus::Unsubscribed);
                Err(err)
            }
        }
    }

    /// Permission, key exchange, platform subscription, backend persistence.
    /// `None` means the user did not grant permission.
    async fn negotiate(&self) -> Result<Option<Subscription>> {
        let current = self.platform.permission().await?;
        self.lock().permission = current;
        if current == Permission::Denied {
            let err = PrestoError::PermissionDenied { blocked: true };
            info!("Notification permission is blocked; not prompting again");
            self.record_failure(&err);
            return Ok(None);
        }

        if current != Permission::Granted {
            self.set_status(SubscriptionStatus::PermissionPending);
            let answer = self.platform.request_permission().await?;
            self.lock().permission = answer;
            if answer != Permission::Granted {
                let err = PrestoError::PermissionDenied {
                    blocked: answer == Permission::Denied,
                };
                info!(permission = ?answer, "Notification permission not granted");
                self.record_failure(&err);
                return Ok(None);
            }
        }

        self.set_status(SubscriptionStatus::Subscribing);
        let key = self.backend.vapid_public_key().await?;
        let options = SubscribeOptions {
            user_visible_only: true,
            application_server_key: url_base64_to_bytes(&key)?,
        };

        let subscription = self.platform.subscribe(&options).await?;

        if let Err(err) = self.backend.register_subscription(&subscription).await {
            match self.platform.unsubscribe().await {
                Ok(_) => debug!("Rolled back platform subscription"),
                Err(rollback) => {
                    warn!(error = %rollback, "Could not roll back platform subscription")
                }
            }
            return Err(err);
        }

        Ok(Some(subscription))
    }

    /// Cancel the subscription on the platform, then on the backend.
    ///
    /// `Ok(false)` without any calls when there is no live subscription.
    pub async fn unsubscribe(&self) -> Result<bool> {
        let subscription = {
            let mut state = self.lock();
            match (state.status, state.subscription.clone()) {
                (SubscriptionStatus::Subscribed, Some(subscription)) => {
                    state.status = SubscriptionStatus::Unsubscribing;
                    subscription
                }
                (status, _) if status.is_transitional() => {
                    return Err(PrestoError::SubscriptionState(format!(
                        "cannot unsubscribe while {:?}",
                        status
                    )));
                }
                _ => return Ok(false),
            }
        };

        if let Err(err) = self.platform.unsubscribe().await {
            warn!(error = %err, "Platform unsubscribe failed; keeping subscription");
            self.record_failure(&err);
            self.set_status(SubscriptionStatus::Subscribed);
            return Err(err);
        }

        {
            let mut state = self.lock();
            state.status = SubscriptionStatus::Unsubscribed;
            state.subscription = None;
        }

        if let Err(err) = self.backend.remove_subscription(&subscription).await {
            warn!(error = %err, "Backend did not remove subscription record");
            self.record_failure(&err);
            return Err(err);
        }

        info!(endpoint = %subscription.endpoint, "Push subscription removed");
        Ok(true)
    }

    /// Ask the platform whether a subscription is live, refreshing the cache.
    pub async fn is_subscribed(&self) -> Result<bool> {
        let live = self.platform.get_subscription().await?;
        let mut state = self.lock();
        if !state.status.is_transitional() {
            state.status = if live.is_some() {
                SubscriptionStatus::Subscribed
            } else {
                SubscriptionStatus::Unsubscribed
            };
            state.subscription = live.clone();
        }
        Ok(live.is_some())
    }

    pub async fn send_test_notification(&self) -> Result<()> {
        if self.status() != SubscriptionStatus::Subscribed {
            return Err(PrestoError::SubscriptionState(
                "no live subscription to send a test notification to".to_string(),
            ));
        }
        self.backend.send_test().await?;
        info!("Test notification requested");
        Ok(())
    }
}
