use std::sync::Arc;

use async_trait::async_trait;

use super::filename::{export_file_name, now_millis};
use super::{ExportArtifactBytes, ExportJob, ExportSource, ExportStatus, ExportStrategy};
use crate::capture::{DocumentSurface, Rasterizer};
use crate::config::ExportConfig;
use crate::page::PageSize;
use crate::paginate::paginate;
use crate::pdf::{encode_pdf, PdfOptions};
use crate::{PrestoError, Result};

/// Client-side export: rasterize the on-screen document, paginate, encode.
pub struct LocalExport<S> {
    rasterizer: Rasterizer<S>,
    page_size: PageSize,
    prefix: String,
    pdf: PdfOptions,
}

impl<S: DocumentSurface> LocalExport<S> {
    pub fn new(rasterizer: Rasterizer<S>, prefix: impl Into<String>) -> Self {
        Self {
            rasterizer,
            page_size: PageSize::A4,
            prefix: prefix.into(),
            pdf: PdfOptions::default(),
        }
    }

    pub fn from_config(rasterizer: Rasterizer<S>, config: &ExportConfig) -> Self {
        Self {
            rasterizer,
            page_size: config.page_size,
            prefix: config.file_prefix.clone(),
            pdf: PdfOptions {
                jpeg_quality: config.jpeg_quality,
                title: None,
            },
        }
    }

    pub fn with_page_size(mut self, page_size: PageSize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn file_name(&self, subject: &str) -> String {
        export_file_name(&self.prefix, subject, now_millis())
    }
}

#[async_trait]
impl<S: DocumentSurface + 'static> ExportStrategy for LocalExport<S> {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn produce(&self, job: &mut ExportJob) -> Result<ExportArtifactBytes> {
        let ExportSource::Capture { target, subject } = &job.source else {
            return Err(PrestoError::JobState(
                "local export needs a capture target".to_string(),
            ));
        };
        let (target, subject) = (target.clone(), subject.clone());

        job.advance(ExportStatus::Capturing);
        let bitmap = self.rasterizer.capture(&target).await?;

        job.advance(ExportStatus::Paginating);
        let pages = paginate(
            Arc::new(bitmap),
            self.page_size.width_mm,
            self.page_size.height_mm,
        )?;
        let options = PdfOptions {
            title: Some(subject.clone()),
            ..self.pdf.clone()
        };
        let bytes = encode_pdf(&pages, &options)?;

        Ok(ExportArtifactBytes {
            file_name: self.file_name(&subject),
            bytes,
            pages: Some(pages.len()),
        })
    }
}
