//! Registration of the background execution context.
//!
//! The platform drives the lifecycle and reports it as a stream of phases;
//! [`RegistrationManager`] only mirrors those phases into a
//! [`RegistrationState`] that callers can read or watch.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::RegistrationConfig;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    #[default]
    Unregistered,
    Installing,
    Waiting,
    Active,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationState {
    pub status: RegistrationStatus,
    pub script_url: Option<String>,
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RegistrationState {
    pub fn is_active(&self) -> bool {
        self.status == RegistrationStatus::Active
    }
}

/// Lifecycle phase reported by the platform for one registration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationPhase {
    Installing,
    /// Installed, waiting for an older context to release its clients.
    Waiting,
    Active,
    /// Replaced by a newer registration or removed; no longer controls clients.
    Redundant,
    Failed(String),
}

#[async_trait]
pub trait RegistrationPlatform: Send + Sync {
    fn is_supported(&self) -> bool;

    /// Start registering `script_url` under `scope`. The receiver reports
    /// phases for as long as the registration lives.
    async fn register(
        &self,
        script_url: &str,
        scope: &str,
    ) -> Result<watch::Receiver<RegistrationPhase>>;
}

type Attempt = Shared<BoxFuture<'static, RegistrationState>>;

#[derive(Default)]
struct InFlight {
    generation: u64,
    attempt: Option<Attempt>,
}

pub struct RegistrationManager {
    platform: Arc<dyn RegistrationPlatform>,
    state: Arc<watch::Sender<RegistrationState>>,
    in_flight: Mutex<InFlight>,
    defaults: RegistrationConfig,
}

impl RegistrationManager {
    pub fn new(platform: Arc<dyn RegistrationPlatform>, defaults: RegistrationConfig) -> Self {
        let (state, _) = watch::channel(RegistrationState::default());
        Self {
            platform,
            state: Arc::new(state),
            in_flight: Mutex::new(InFlight::default()),
            defaults,
        }
    }

    pub fn state(&self) -> RegistrationState {
        self.state.borrow().clone()
    }

    pub fn subscribe_changes(&self) -> watch::Receiver<RegistrationState> {
        self.state.subscribe()
    }

    pub async fn register_default(&self) -> RegistrationState {
        let RegistrationConfig { script_url, scope } = self.defaults.clone();
        self.register(&script_url, &scope).await
    }

    /// Register the background context and wait until it is active or failed.
    ///
    /// Returns immediately when already active. Concurrent callers share one
    /// attempt. Failures are reported in the returned state.
    pub async fn register(&self, script_url: &str, scope: &str) -> RegistrationState {
        let current = self.state();
        if current.is_active() {
            debug!(script_url = ?current.script_url, "Registration already active");
            return current;
        }

        let (generation, attempt) = {
            let mut slot = self.in_flight.lock().await;
            match slot.attempt.clone() {
                Some(attempt) => (slot.generation, attempt),
                None => {
                    slot.generation += 1;
                    let attempt = run_attempt(
                        Arc::clone(&self.platform),
                        Arc::clone(&self.state),
                        script_url.to_string(),
                        scope.to_string(),
                    )
                    .boxed()
                    .shared();
                    slot.attempt = Some(attempt.clone());
                    (slot.generation, attempt)
                }
            }
        };

        let outcome = attempt.await;

        let mut slot = self.in_flight.lock().await;
        if slot.generation == generation {
            slot.attempt = None;
        }
        outcome
    }
}

async fn run_attempt(
    platform: Arc<dyn RegistrationPlatform>,
    state: Arc<watch::Sender<RegistrationState>>,
    script_url: String,
    scope: String,
) -> RegistrationState {
    let set = |status: RegistrationStatus, error: Option<String>| {
        state.send_modify(|s| {
            s.status = status;
            s.script_url = Some(script_url.clone());
            s.scope = Some(scope.clone());
            s.error = error;
        });
    };

    if !platform.is_supported() {
        warn!("Background registration is not supported on this platform");
        set(
            RegistrationStatus::Error,
            Some("Background registration is not supported".to_string()),
        );
        return state.borrow().clone();
    }

    info!(%script_url, %scope, "Registering background context");
    set(RegistrationStatus::Installing, None);

    let mut phases = match platform.register(&script_url, &scope).await {
        Ok(phases) => phases,
        Err(err) => {
            warn!(error = %err, "Registration rejected");
            set(RegistrationStatus::Error, Some(err.to_string()));
            return state.borrow().clone();
        }
    };

    loop {
        let phase = phases.borrow_and_update().clone();
        debug!(?phase, "Registration phase");
        match phase {
            RegistrationPhase::Installing => set(RegistrationStatus::Installing, None),
            RegistrationPhase::Waiting => set(RegistrationStatus::Waiting, None),
            RegistrationPhase::Active => {
                info!(%script_url, "Background context active");
                set(RegistrationStatus::Active, None);
                tokio::spawn(follow_active(phases, Arc::clone(&state)));
                break;
            }
            RegistrationPhase::Redundant => {
                warn!("Registration became redundant before activating");
                set(
                    RegistrationStatus::Error,
                    Some("Registration was replaced before becoming active".to_string()),
                );
                break;
            }
            RegistrationPhase::Failed(message) => {
                warn!(%message, "Registration failed");
                set(RegistrationStatus::Error, Some(message));
                break;
            }
        }

        if phases.changed().await.is_err() {
            warn!("Platform stopped reporting before registration settled");
            set(
                RegistrationStatus::Error,
                Some("Registration ended before becoming active".to_string()),
            );
            break;
        }
    }

    state.borrow().clone()
}

/// Keep mirroring an active registration until it is replaced or fails.
/// An update installing behind it does not change the state.
async fn follow_active(
    mut phases: watch::Receiver<RegistrationPhase>,
    state: Arc<watch::Sender<RegistrationState>>,
) {
    while phases.changed().await.is_ok() {
        let phase = phases.borrow_and_update().clone();
        match phase {
            RegistrationPhase::Installing | RegistrationPhase::Waiting => {
                debug!(?phase, "Update pending behind the active context");
            }
            RegistrationPhase::Active => {
                state.send_if_modified(|s| {
                    let changed = s.status != RegistrationStatus::Active;
                    s.status = RegistrationStatus::Active;
                    changed
                });
            }
            RegistrationPhase::Redundant => {
                info!("Active registration became redundant");
                state.send_modify(|s| {
                    s.status = RegistrationStatus::Unregistered;
                    s.error = None;
                });
                return;
            }
            RegistrationPhase::Failed(message) => {
                warn!(%message, "Active registration failed");
                state.send_modify(|s| {
                    s.status = RegistrationStatus::Error;
                    s.error = Some(message);
                });
                return;
            }
        }
    }
}
