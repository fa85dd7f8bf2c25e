use std::sync::Arc;

use crate::backend::BackendClient;
use crate::capture::{DocumentSurface, Rasterizer};
use crate::config::Config;
use crate::export::{BudgetRenderer, DirectorySink, ExportController, LocalExport, RemoteExport};
use crate::push::{PushBackend, PushManager, PushPlatform};
use crate::registration::{RegistrationManager, RegistrationPlatform};
use crate::Result;

/// Owns the long-lived managers for one application instance.
pub struct ServiceRegistry {
    config: Config,
    registration: Arc<RegistrationManager>,
    push: Arc<PushManager>,
    renderer: Option<Arc<dyn BudgetRenderer>>,
}

impl ServiceRegistry {
    pub fn new(
        config: Config,
        registration_platform: Arc<dyn RegistrationPlatform>,
        push_platform: Arc<dyn PushPlatform>,
        push_backend: Arc<dyn PushBackend>,
    ) -> Self {
        let registration = Arc::new(RegistrationManager::new(
            registration_platform,
            config.registration.clone(),
        ));
        let push = Arc::new(PushManager::new(
            push_platform,
            push_backend,
            registration.subscribe_changes(),
        ));
        Self {
            config,
            registration,
            push,
            renderer: None,
        }
    }

    /// Build the registry against the configured REST backend.
    pub fn connect(
        config: Config,
        registration_platform: Arc<dyn RegistrationPlatform>,
        push_platform: Arc<dyn PushPlatform>,
    ) -> Result<Self> {
        config.validate()?;
        let backend = Arc::new(BackendClient::from_config(&config.backend)?);
        let registry = Self::new(
            config,
            registration_platform,
            push_platform,
            backend.clone(),
        );
        Ok(registry.with_renderer(backend))
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn BudgetRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registration(&self) -> &Arc<RegistrationManager> {
        &self.registration
    }

    pub fn push(&self) -> &Arc<PushManager> {
        &self.push
    }

    /// Export controller writing into the configured output directory, with
    /// a local strategy over `rasterizer` and a remote one when a renderer
    /// is available.
    pub fn export_controller<S>(&self, rasterizer: Option<Rasterizer<S>>) -> ExportController
    where
        S: DocumentSurface + 'static,
    {
        let export = &self.config.export;
        let mut controller =
            ExportController::new(Arc::new(DirectorySink::new(export.output_dir.clone())));
        if let Some(rasterizer) = rasterizer {
            controller = controller.with_local(LocalExport::from_config(rasterizer, export));
        }
        if let Some(renderer) = &self.renderer {
            controller =
                controller.with_remote(RemoteExport::new(renderer.clone(), &export.file_prefix));
        }
        controller
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::push::{Permission, SubscribeOptions, Subscription, SubscriptionStatus};
    use crate::registration::tests::ScriptedPlatform;
    use crate::registration::RegistrationStatus;
    use async_trait::async_trait;

    /// Push platform and backend for a user who blocked notifications.
    struct Blocked;

    #[async_trait]
    impl PushPlatform for Blocked {
        async fn permission(&self) -> Result<Permission> {
            Ok(Permission::Denied)
        }
        async fn request_permission(&self) -> Result<Permission> {
            Ok(Permission::Denied)
        }
        async fn subscribe(&self, _options: &SubscribeOptions) -> Result<Subscription> {
            unreachable!("permission is denied")
        }
        async fn get_subscription(&self) -> Result<Option<Subscription>> {
            Ok(None)
        }
        async fn unsubscribe(&self) -> Result<bool> {
            Ok(false)
        }
    }

    #[async_trait]
    impl PushBackend for Blocked {
        async fn vapid_public_key(&self) -> Result<String> {
            unreachable!("permission is denied")
        }
        async fn register_subscription(&self, _subscription: &Subscription) -> Result<()> {
            unreachable!("permission is denied")
        }
        async fn remove_subscription(&self, _subscription: &Subscription) -> Result<()> {
            unreachable!("never subscribed")
        }
        async fn send_test(&self) -> Result<()> {
            unreachable!("never subscribed")
        }
    }

    #[tokio::test]
    async fn push_manager_follows_registration_state() {
        let registry = ServiceRegistry::new(
            Config::default(),
            Arc::new(ScriptedPlatform::activating()),
            Arc::new(Blocked),
            Arc::new(Blocked),
        );

        assert!(!registry.push().subscribe().await.expect("subscribe"));
        let failure = registry.push().last_failure().expect("failure");
        assert_eq!(failure.category, ErrorCategory::State);

        let state = registry.registration().register_default().await;
        assert_eq!(state.status, RegistrationStatus::Active);

        assert!(!registry.push().subscribe().await.expect("subscribe"));
        let failure = registry.push().last_failure().expect("failure");
        assert_eq!(failure.category, ErrorCategory::Permission);
        assert_eq!(registry.push().status(), SubscriptionStatus::Unsubscribed);
    }

    #[test]
    fn connect_rejects_invalid_config() {
        let mut config = Config::default();
        config.export.jpeg_quality = 0;
        let registry = ServiceRegistry::connect(
            config,
            Arc::new(ScriptedPlatform::activating()),
            Arc::new(Blocked),
        );
        assert!(matches!(registry, Err(crate::PrestoError::Config(_))));
    }

    #[test]
    fn connect_wires_remote_export() {
        let registry = ServiceRegistry::connect(
            Config::default(),
            Arc::new(ScriptedPlatform::activating()),
            Arc::new(Blocked),
        )
        .expect("connect");
        assert!(registry.renderer.is_some());
        assert_eq!(registry.config().registration.script_url, "/sw.js");
    }
}
