//! Presto Library
//!
//! Client-side artifact generation and notification delivery for a budget
//! management front-end: rasterize an on-screen document into a paginated
//! PDF, and negotiate push subscriptions that surface as system
//! notifications.
//!
//! # Module Overview
//!
//! - [`capture`] - DOM subtree rasterization (Playwright-backed surface included)
//! - [`paginate`] - Slicing a tall capture into fixed-size pages
//! - [`pdf`] - Multi-page PDF encoding
//! - [`export`] - Export jobs, local and server-rendered strategies, artifact sinks
//! - [`registration`] - Background execution context registration
//! - [`push`] - Push subscription negotiation
//! - [`worker`] - Push rendering and notification click routing
//! - [`backend`] - REST client for the push broker and budget renderer
//! - [`services`] - Owned container for the long-lived managers
//! - [`config`] - Configuration file support
//!
//! # Example
//!
//! ```no_run
//! use presto_lib::{CaptureTarget, Config, ExportJob, PlaywrightSurface, Rasterizer};
//! use presto_lib::{DirectorySink, ExportController, LocalExport};
//! use std::sync::Arc;
//!
//! # async fn example() -> presto_lib::Result<()> {
//! let config = Config::load(None)?;
//! let surface = PlaywrightSurface::launch((&config.capture).into()).await?;
//! surface.open("http://localhost:5173/presupuestos/42", config.capture.scale).await?;
//!
//! let rasterizer = Rasterizer::new(surface).with_timeout(config.capture.timeout);
//! let controller = ExportController::new(Arc::new(DirectorySink::new(&config.export.output_dir)))
//!     .with_local(LocalExport::from_config(rasterizer, &config.export));
//!
//! let target = CaptureTarget::from_config("#presupuesto", &config.capture)?;
//! let mut job = ExportJob::capture(target, "Juan Pérez");
//! let artifact = controller.export_document(&mut job).await?;
//! println!("saved {}", artifact.location.display());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod capture;
pub mod config;
pub mod error;
pub mod export;
pub mod page;
pub mod paginate;
pub mod pdf;
pub mod progress;
pub mod push;
pub mod registration;
pub mod services;
pub mod worker;

pub use backend::{BackendAuth, BackendClient};
pub use capture::{
    Bitmap, CaptureTarget, DocumentSurface, NodeLayout, PlaywrightOptions, PlaywrightSurface,
    Rasterizer, RenderRequest,
};
pub use config::Config;
pub use error::{ErrorCategory, ErrorPayload, PrestoError, Result};
pub use export::{
    ArtifactSink, BudgetDocument, BudgetRenderer, DirectorySink, ExportArtifact,
    ExportController, ExportJob, ExportSource, ExportStatus, LocalExport, RemoteExport,
};
pub use page::PageSize;
pub use paginate::{paginate, PageImage};
pub use pdf::{encode_pdf, PdfOptions};
pub use progress::ProgressCallback;
pub use push::{
    url_base64_to_bytes, Permission, PushBackend, PushManager, PushPlatform, Subscription,
    SubscriptionStatus,
};
pub use registration::{
    RegistrationManager, RegistrationPhase, RegistrationPlatform, RegistrationState,
    RegistrationStatus,
};
pub use services::ServiceRegistry;
pub use worker::{
    transition, NotificationRecord, PushPayload, ServiceWorker, WorkerEvent, WorkerHost,
    WorkerPhase,
};
