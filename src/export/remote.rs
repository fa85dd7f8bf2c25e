//! Server-rendered export: the backend turns structured budget fields into a PDF.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::filename::{export_file_name, now_millis};
use super::{ExportArtifactBytes, ExportJob, ExportSource, ExportStatus, ExportStrategy};
use crate::{PrestoError, Result};

/// Payload posted to `/presupuestos/generar-pdf`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetDocument {
    #[serde(rename = "cliente")]
    pub recipient: Recipient,
    #[serde(rename = "vehiculo")]
    pub vehicle: Vehicle,
    #[serde(rename = "anticipo", default, skip_serializing_if = "Option::is_none")]
    pub down_payment: Option<f64>,
    #[serde(rename = "cuotas", default)]
    pub installments: Vec<InstallmentLine>,
    #[serde(rename = "observaciones", default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(rename = "telefono", default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    #[serde(rename = "marca")]
    pub brand: String,
    #[serde(rename = "modelo")]
    pub model: String,
    #[serde(rename = "version", default, skip_serializing_if = "Option::is_none")]
    pub trim: Option<String>,
    #[serde(rename = "anio", default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u16>,
    #[serde(rename = "precio")]
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentLine {
    /// Term in months.
    #[serde(rename = "plazo")]
    pub months: u32,
    #[serde(rename = "valorCuota")]
    pub amount: f64,
    #[serde(rename = "tasa", default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
}

/// Renders a [`BudgetDocument`] into PDF bytes.
#[async_trait]
pub trait BudgetRenderer: Send + Sync {
    async fn render_budget(&self, document: &BudgetDocument) -> Result<Vec<u8>>;
}

pub struct RemoteExport {
    renderer: Arc<dyn BudgetRenderer>,
    prefix: String,
}

impl RemoteExport {
    pub fn new(renderer: Arc<dyn BudgetRenderer>, prefix: impl Into<String>) -> Self {
        Self {
            renderer,
            prefix: prefix.into(),
        }
    }

    pub fn file_name(&self, document: &BudgetDocument) -> String {
        export_file_name(&self.prefix, &document.recipient.name, now_millis())
    }
}

#[async_trait]
impl ExportStrategy for RemoteExport {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn produce(&self, job: &mut ExportJob) -> Result<ExportArtifactBytes> {
        let ExportSource::Budget(document) = &job.source else {
            return Err(PrestoError::JobState(
                "remote export needs a budget document".to_string(),
            ));
        };
        let document = document.clone();

        job.advance(ExportStatus::Capturing);
        let bytes = self.renderer.render_budget(&document).await?;
        if bytes.is_empty() {
            return Err(PrestoError::backend(
                None,
                "backend returned an empty document",
            ));
        }

        Ok(ExportArtifactBytes {
            file_name: self.file_name(&document),
            bytes,
            pages: None,
        })
    }
}
