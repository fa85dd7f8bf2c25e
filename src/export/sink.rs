use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::{PrestoError, Result};

/// Destination for finished artifacts. Called once per successful export.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Persist `bytes` under `file_name` and return where it landed.
    async fn save(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf>;
}

/// Writes artifacts into a directory, creating it when missing.
///
/// The file is written under a temporary name and renamed into place, so a
/// failed write never leaves a partial artifact at the final path.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ArtifactSink for DirectorySink {
    async fn save(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        if file_name.is_empty() || file_name.contains(['/', '\\']) || file_name.starts_with('.') {
            return Err(PrestoError::Config(format!(
                "Refusing to save artifact with unsafe name {:?}",
                file_name
            )));
        }

        fs::create_dir_all(&self.dir).await?;
        let target = self.dir.join(file_name);
        let partial = self.dir.join(format!(".{}.partial", file_name));

        if let Err(err) = fs::write(&partial, bytes).await {
            let _ = fs::remove_file(&partial).await;
            return Err(err.into());
        }
        if let Err(err) = fs::rename(&partial, &target).await {
            let _ = fs::remove_file(&partial).await;
            return Err(err.into());
        }

        tracing::info!(path = %target.display(), bytes = bytes.len(), "Artifact saved");
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn saves_into_created_directory() {
        let dir = TempDir::new().expect("tempdir");
        let sink = DirectorySink::new(dir.path().join("exports"));

        let path = sink
            .save("presupuesto_Ana_1.pdf", b"%PDF-1.4")
            .await
            .expect("save");

        assert_eq!(path, dir.path().join("exports").join("presupuesto_Ana_1.pdf"));
        assert_eq!(std::fs::read(&path).expect("read back"), b"%PDF-1.4");
        let leftovers: Vec<_> = std::fs::read_dir(sink.dir())
            .expect("list")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".partial"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let dir = TempDir::new().expect("tempdir");
        let sink = DirectorySink::new(dir.path());

        for name in ["../evil.pdf", "a/b.pdf", ".hidden.pdf", ""] {
            assert!(
                matches!(sink.save(name, b"x").await, Err(PrestoError::Config(_))),
                "expected {name:?} to be rejected"
            );
        }
    }
}
