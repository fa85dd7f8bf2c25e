use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::page::PageSize;
use crate::{PrestoError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub export: ExportConfig,
    pub capture: CaptureConfig,
    pub registration: RegistrationConfig,
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Environment variable holding the session bearer token.
    pub token_env: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api/".to_string(),
            timeout: Duration::from_secs(30),
            token_env: "PRESTO_API_TOKEN".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub page_size: PageSize,
    pub file_prefix: String,
    pub output_dir: PathBuf,
    pub jpeg_quality: u8,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            page_size: PageSize::A4,
            file_prefix: "presupuesto".to_string(),
            output_dir: PathBuf::from("exports"),
            jpeg_quality: 92,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub scale: f32,
    pub use_cors: bool,
    pub background: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub node_command: String,
    pub headless: bool,
    /// Interactive chrome hidden while the document is rasterized.
    pub hidden_selectors: Vec<String>,
    pub allowed_origins: Vec<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            scale: 2.0,
            use_cors: true,
            background: "#ffffff".to_string(),
            timeout: Duration::from_secs(20),
            node_command: "node".to_string(),
            headless: true,
            hidden_selectors: vec!["button".to_string(), ".no-print".to_string()],
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    pub script_url: String,
    pub scope: String,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            script_url: "/sw.js".to_string(),
            scope: "/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub default_title: String,
    pub default_body: String,
    pub icon: String,
    pub badge: String,
    pub root_url: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            default_title: "Nueva notificación".to_string(),
            default_body: "Tienes una nueva notificación".to_string(),
            icon: "/icons/icon-192x192.png".to_string(),
            badge: "/icons/badge-72x72.png".to_string(),
            root_url: "/".to_string(),
        }
    }
}

impl Config {
    /// Load config from an explicit path, the central config file, or defaults.
    /// Priority: explicit path > ~/.config/presto/config.toml > defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let candidate = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::central_config_path().filter(|p| p.exists()),
        };

        let Some(path) = candidate else {
            return Ok(Config::default());
        };

        let raw = fs::read_to_string(&path).map_err(|e| {
            PrestoError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&raw).map_err(|e| match e {
            PrestoError::Config(msg) => {
                PrestoError::Config(format!("Invalid config ({}): {}", path.display(), msg))
            }
            other => other,
        })?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(raw).map_err(|e| PrestoError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn central_config_path() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .filter(|home| !home.is_empty())
            .map(|home| {
                PathBuf::from(home)
                    .join(".config")
                    .join("presto")
                    .join("config.toml")
            })
    }

    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.backend.base_url).map_err(|e| {
            PrestoError::Config(format!(
                "backend.base_url {:?} is not a valid URL: {}",
                self.backend.base_url, e
            ))
        })?;
        if !(self.capture.scale > 0.0 && self.capture.scale.is_finite()) {
            return Err(PrestoError::Config(format!(
                "capture.scale must be positive, got {}",
                self.capture.scale
            )));
        }
        crate::capture::parse_background(&self.capture.background)?;
        if self.export.jpeg_quality == 0 || self.export.jpeg_quality > 100 {
            return Err(PrestoError::Config(format!(
                "export.jpeg_quality must be within 1..=100, got {}",
                self.export.jpeg_quality
            )));
        }
        if self.export.file_prefix.trim().is_empty() {
            return Err(PrestoError::Config(
                "export.file_prefix cannot be empty".to_string(),
            ));
        }
        if self.registration.script_url.trim().is_empty() {
            return Err(PrestoError::Config(
                "registration.script_url cannot be empty".to_string(),
            ));
        }
        if !self.registration.scope.starts_with('/') {
            return Err(PrestoError::Config(format!(
                "registration.scope must start with '/', got {:?}",
                self.registration.scope
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_values_match_expected() {
        let cfg = Config::default();

        assert_eq!(cfg.export.page_size, PageSize::A4);
        assert_eq!(cfg.export.file_prefix, "presupuesto");
        assert!((cfg.capture.scale - 2.0).abs() < f32::EPSILON);
        assert_eq!(cfg.capture.timeout, Duration::from_secs(20));
        assert_eq!(cfg.registration.script_url, "/sw.js");
        assert_eq!(cfg.registration.scope, "/");
        assert_eq!(cfg.backend.timeout, Duration::from_secs(30));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults_for_missing_fields() {
        let cfg = Config::from_toml(
            r#"
            [backend]
            base_url = "https://crm.example.com/api/"
            timeout = "5s"

            [export]
            page_size = "letter"

            [capture]
            scale = 1.5
            hidden_selectors = [".actions"]
            "#,
        )
        .expect("parse config");

        assert_eq!(cfg.backend.base_url, "https://crm.example.com/api/");
        assert_eq!(cfg.backend.timeout, Duration::from_secs(5));
        assert_eq!(cfg.export.page_size, PageSize::LETTER);
        assert_eq!(cfg.export.jpeg_quality, 92);
        assert!((cfg.capture.scale - 1.5).abs() < f32::EPSILON);
        assert_eq!(cfg.capture.hidden_selectors, vec![".actions".to_string()]);
        assert_eq!(cfg.notifications.root_url, "/");
    }

    #[test]
    fn rejects_invalid_values() {
        let err = Config::from_toml("[capture]\nscale = 0.0\n").unwrap_err();
        assert!(err.to_string().contains("capture.scale"), "got: {err}");

        let err = Config::from_toml("[registration]\nscope = \"app\"\n").unwrap_err();
        assert!(err.to_string().contains("registration.scope"), "got: {err}");

        let err = Config::from_toml("[export]\njpeg_quality = 0\n").unwrap_err();
        assert!(err.to_string().contains("jpeg_quality"), "got: {err}");

        assert!(Config::from_toml("[export]\npage_size = \"0x10\"\n").is_err());
    }

    #[test]
    fn load_reads_explicit_path() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("presto.toml");
        fs::write(&path, "[export]\nfile_prefix = \"cotizacion\"\n").expect("write config");

        let cfg = Config::load(Some(&path)).expect("load config");
        assert_eq!(cfg.export.file_prefix, "cotizacion");
    }

    #[test]
    fn load_reports_path_on_invalid_file() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[capture]\nbackground = \"not-a-colour\"\n").expect("write config");

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("broken.toml"), "got: {err}");
    }
}
