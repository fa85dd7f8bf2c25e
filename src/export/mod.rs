//! Export pipeline: turns a document into a saved PDF artifact.
//!
//! # Module Structure
//!
//! - [`local`] - Rasterize, paginate and encode on the client
//! - [`remote`] - Ask the backend to render a structured budget
//! - [`sink`] - Where finished artifacts are written
//! - [`filename`] - Artifact naming
//!
//! Both strategies produce bytes and a file name; the [`ExportController`]
//! owns the job status and performs the single save.

mod filename;
mod local;
mod remote;
mod sink;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::capture::CaptureTarget;
use crate::error::ErrorPayload;
use crate::progress::{log_progress, ProgressCallback};
use crate::{PrestoError, Result};

pub use filename::{export_file_name, now_millis, sanitize_subject};
pub use local::LocalExport;
pub use remote::{
    BudgetDocument, BudgetRenderer, InstallmentLine, Recipient, RemoteExport, Vehicle,
};
pub use sink::{ArtifactSink, DirectorySink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportStatus {
    Pending,
    Capturing,
    Paginating,
    Saving,
    Done,
    Failed,
}

impl ExportStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExportStatus::Done | ExportStatus::Failed)
    }
}

/// What a job exports.
#[derive(Debug, Clone)]
pub enum ExportSource {
    /// An on-screen document, named after `subject`.
    Capture {
        target: CaptureTarget,
        subject: String,
    },
    /// Structured fields rendered by the backend.
    Budget(BudgetDocument),
}

/// One export request. Jobs are single-use and never persisted.
#[derive(Debug, Clone)]
pub struct ExportJob {
    pub id: Uuid,
    pub source: ExportSource,
    pub output_name: Option<String>,
    status: ExportStatus,
    error: Option<ErrorPayload>,
}

impl ExportJob {
    pub fn new(source: ExportSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            output_name: None,
            status: ExportStatus::Pending,
            error: None,
        }
    }

    pub fn capture(target: CaptureTarget, subject: impl Into<String>) -> Self {
        Self::new(ExportSource::Capture {
            target,
            subject: subject.into(),
        })
    }

    pub fn budget(document: BudgetDocument) -> Self {
        Self::new(ExportSource::Budget(document))
    }

    pub fn status(&self) -> ExportStatus {
        self.status
    }

    pub fn error(&self) -> Option<&ErrorPayload> {
        self.error.as_ref()
    }

    pub(crate) fn advance(&mut self, next: ExportStatus) {
        debug!(job = %self.id, from = ?self.status, to = ?next, "Export status");
        self.status = next;
    }

    fn fail(&mut self, err: &PrestoError) {
        warn!(job = %self.id, at = ?self.status, error = %err, "Export failed");
        self.error = Some(err.to_payload());
        self.status = ExportStatus::Failed;
    }
}

/// Output of a strategy, before it is saved.
#[derive(Debug, Clone)]
pub struct ExportArtifactBytes {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub pages: Option<usize>,
}

/// A saved artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub file_name: String,
    pub location: PathBuf,
    pub size: usize,
    pub pages: Option<usize>,
}

#[async_trait]
pub trait ExportStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Build the artifact bytes, advancing `job` through its working states.
    async fn produce(&self, job: &mut ExportJob) -> Result<ExportArtifactBytes>;
}

pub struct ExportController {
    local: Option<Arc<dyn ExportStrategy>>,
    remote: Option<Arc<dyn ExportStrategy>>,
    sink: Arc<dyn ArtifactSink>,
    progress: Option<ProgressCallback>,
}

impl ExportController {
    pub fn new(sink: Arc<dyn ArtifactSink>) -> Self {
        Self {
            local: None,
            remote: None,
            sink,
            progress: None,
        }
    }

    pub fn with_local(mut self, strategy: impl ExportStrategy + 'static) -> Self {
        self.local = Some(Arc::new(strategy));
        self
    }

    pub fn with_remote(mut self, strategy: impl ExportStrategy + 'static) -> Self {
        self.remote = Some(Arc::new(strategy));
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Run `job` to completion and save its artifact exactly once.
    ///
    /// On failure the job ends in [`ExportStatus::Failed`] with the error
    /// recorded, and nothing is saved. A job that already left `pending` is
    /// rejected without touching its state.
    pub async fn export_document(&self, job: &mut ExportJob) -> Result<ExportArtifact> {
        if job.status != ExportStatus::Pending {
            return Err(PrestoError::JobState(format!(
                "job {} is {:?}, expected Pending",
                job.id, job.status
            )));
        }

        match self.run(job).await {
            Ok(artifact) => {
                job.advance(ExportStatus::Done);
                info!(
                    job = %job.id,
                    file = %artifact.file_name,
                    bytes = artifact.size,
                    "Export complete"
                );
                Ok(artifact)
            }
            Err(err) => {
                job.fail(&err);
                Err(err)
            }
        }
    }

    async fn run(&self, job: &mut ExportJob) -> Result<ExportArtifact> {
        let strategy = match job.source {
            ExportSource::Capture { .. } => self.local.clone(),
            ExportSource::Budget(_) => self.remote.clone(),
        }
        .ok_or_else(|| {
            PrestoError::Config("no export strategy configured for this job".to_string())
        })?;

        log_progress(
            &self.progress,
            &format!("Exporting with {} strategy", strategy.name()),
        );
        let produced = strategy.produce(job).await?;
        job.output_name = Some(produced.file_name.clone());

        job.advance(ExportStatus::Saving);
        log_progress(&self.progress, &format!("Saving {}", produced.file_name));
        let location = self.sink.save(&produced.file_name, &produced.bytes).await?;

        Ok(ExportArtifact {
            file_name: produced.file_name,
            location,
            size: produced.bytes.len(),
            pages: produced.pages,
        })
    }
}
