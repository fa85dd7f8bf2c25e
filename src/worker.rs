//! Background context behaviour: lifecycle, push rendering and click routing.
//!
//! Events are dispatched through [`transition`], a table from
//! `(phase, event)` to the phase held while the action runs, the phase reached
//! afterwards, and the action itself. Host side effects go through
//! [`WorkerHost`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::NotificationConfig;
use crate::{PrestoError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerPhase {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Install,
    Activate,
    /// Raw push payload, if the message carried one.
    Push(Option<Vec<u8>>),
    NotificationClick(NotificationRecord),
    /// The user dismissed a notification without clicking it.
    NotificationClose(NotificationRecord),
}

impl fmt::Display for WorkerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerEvent::Install => "install",
            WorkerEvent::Activate => "activate",
            WorkerEvent::Push(_) => "push",
            WorkerEvent::NotificationClick(_) => "notificationclick",
            WorkerEvent::NotificationClose(_) => "notificationclose",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerAction {
    SkipWaiting,
    ClaimClients,
    ShowNotification,
    RouteClick,
    Dismiss,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub during: WorkerPhase,
    pub after: WorkerPhase,
    pub action: WorkerAction,
}

/// `None` when `event` is not handled in `phase`.
pub fn transition(phase: WorkerPhase, event: &WorkerEvent) -> Option<Transition> {
    use WorkerAction::*;
    use WorkerPhase::*;

    let (during, after, action) = match (phase, event) {
        (Parsed, WorkerEvent::Install) => (Installing, Installed, SkipWaiting),
        (Installed, WorkerEvent::Activate) => (Activating, Activated, ClaimClients),
        (Activated, WorkerEvent::Push(_)) => (Activated, Activated, ShowNotification),
        (Activated, WorkerEvent::NotificationClick(_)) => (Activated, Activated, RouteClick),
        (Activated, WorkerEvent::NotificationClose(_)) => (Activated, Activated, Dismiss),
        _ => return None,
    };
    Some(Transition {
        during,
        after,
        action,
    })
}

/// Incoming push message body. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
    pub data: Option<Value>,
}

impl PushPayload {
    /// Parse a JSON payload; absent or malformed payloads are treated as empty.
    pub fn parse(raw: Option<&[u8]>) -> Self {
        let Some(raw) = raw.filter(|r| !r.is_empty()) else {
            return Self::default();
        };
        match serde_json::from_slice(raw) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "Ignoring malformed push payload");
                Self::default()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub tag: String,
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    #[serde(default)]
    pub data: Value,
}

impl NotificationRecord {
    pub fn from_payload(payload: PushPayload, defaults: &NotificationConfig) -> Self {
        Self {
            tag: Uuid::new_v4().to_string(),
            title: payload.title.unwrap_or_else(|| defaults.default_title.clone()),
            body: payload.body.unwrap_or_else(|| defaults.default_body.clone()),
            icon: defaults.icon.clone(),
            badge: defaults.badge.clone(),
            data: payload.data.unwrap_or(Value::Null),
        }
    }
}

/// Side effects available to the background context.
#[async_trait]
pub trait WorkerHost: Send + Sync {
    async fn skip_waiting(&self) -> Result<()>;
    async fn claim_clients(&self) -> Result<()>;
    async fn show_notification(&self, notification: &NotificationRecord) -> Result<()>;
    async fn close_notification(&self, tag: &str) -> Result<()>;
    /// Focus an open client at `url`. `false` when none is open.
    async fn focus_client(&self, url: &str) -> Result<bool>;
    async fn open_window(&self, url: &str) -> Result<()>;
}

pub struct ServiceWorker {
    host: Arc<dyn WorkerHost>,
    notifications: NotificationConfig,
    phase: WorkerPhase,
}

impl ServiceWorker {
    pub fn new(host: Arc<dyn WorkerHost>, notifications: NotificationConfig) -> Self {
        Self {
            host,
            notifications,
            phase: WorkerPhase::Parsed,
        }
    }

    /// Rebuild a worker the platform restarted after it went idle.
    ///
    /// Install and activate do not fire again after a restart, so the worker
    /// starts in the last phase it reached. An interrupted `Installing` or
    /// `Activating` falls back to the phase before it.
    pub fn resume(
        host: Arc<dyn WorkerHost>,
        notifications: NotificationConfig,
        phase: WorkerPhase,
    ) -> Self {
        let phase = match phase {
            WorkerPhase::Installing => WorkerPhase::Parsed,
            WorkerPhase::Activating => WorkerPhase::Installed,
            settled => settled,
        };
        debug!(?phase, "Worker resumed");
        Self {
            host,
            notifications,
            phase,
        }
    }

    pub fn phase(&self) -> WorkerPhase {
        self.phase
    }

    /// Dispatch one event and await its side effects. Returns the notification
    /// shown for a push event.
    ///
    /// If the action fails the worker returns to the phase it was in.
    pub async fn handle(&mut self, event: WorkerEvent) -> Result<Option<NotificationRecord>> {
        let Some(step) = transition(self.phase, &event) else {
            return Err(PrestoError::platform(format!(
                "{event} is not handled while {:?}",
                self.phase
            )));
        };

        let before = self.phase;
        self.phase = step.during;
        debug!(%event, from = ?before, during = ?step.during, "Worker event");

        match self.run(step.action, event).await {
            Ok(shown) => {
                self.phase = step.after;
                Ok(shown)
            }
            Err(err) => {
                warn!(action = ?step.action, error = %err, "Worker action failed");
                self.phase = before;
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        action: WorkerAction,
        event: WorkerEvent,
    ) -> Result<Option<NotificationRecord>> {
        match (action, event) {
            (WorkerAction::SkipWaiting, _) => {
                self.host.skip_waiting().await?;
                Ok(None)
            }
            (WorkerAction::ClaimClients, _) => {
                self.host.claim_clients().await?;
                info!("Worker activated and controlling clients");
                Ok(None)
            }
            (WorkerAction::ShowNotification, WorkerEvent::Push(raw)) => {
                let payload = PushPayload::parse(raw.as_deref());
                let record = NotificationRecord::from_payload(payload, &self.notifications);
                self.host.show_notification(&record).await?;
                debug!(tag = %record.tag, title = %record.title, "Notification shown");
                Ok(Some(record))
            }
            (WorkerAction::RouteClick, WorkerEvent::NotificationClick(record)) => {
                self.host.close_notification(&record.tag).await?;
                let url = &self.notifications.root_url;
                if !self.host.focus_client(url).await? {
                    self.host.open_window(url).await?;
                }
                Ok(None)
            }
            (WorkerAction::Dismiss, WorkerEvent::NotificationClose(record)) => {
                debug!(tag = %record.tag, "Notification dismissed");
                Ok(None)
            }
            (action, event) => Err(PrestoError::platform(format!(
                "{event} cannot run {action:?}"
            ))),
        }
    }
}
