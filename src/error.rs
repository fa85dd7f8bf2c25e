use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::ParseError;

#[derive(Debug, Error)]
pub enum PrestoError {
    #[error("Capture target not found: {0}")]
    TargetNotFound(String),

    #[error("Cross-origin asset is not allow-listed: {url}")]
    CrossOriginAsset { url: String },

    #[error("Capture did not settle within {0:?}")]
    CaptureTimeout(Duration),

    #[error("Captured bitmap is empty ({width}x{height})")]
    EmptyCapture { width: u32, height: u32 },

    #[error("Notification permission denied (blocked: {blocked})")]
    PermissionDenied { blocked: bool },

    #[error("Unsupported environment: {0}")]
    UnsupportedEnvironment(String),

    #[error("Backend error (status: {status:?}): {message}")]
    Backend {
        status: Option<StatusCode>,
        message: String,
    },

    #[error("Invalid subscription state: {0}")]
    SubscriptionState(String),

    #[error("Invalid export job state: {0}")]
    JobState(String),

    #[error("Invalid application server key: {0}")]
    InvalidKey(String),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] ParseError),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PrestoError {
    pub fn backend(status: Option<StatusCode>, message: impl Into<String>) -> Self {
        PrestoError::Backend {
            status,
            message: message.into(),
        }
    }

    pub fn platform(message: impl Into<String>) -> Self {
        PrestoError::Platform(message.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            PrestoError::TargetNotFound(_)
            | PrestoError::CrossOriginAsset { .. }
            | PrestoError::CaptureTimeout(_)
            | PrestoError::EmptyCapture { .. } => ErrorCategory::Capture,
            PrestoError::PermissionDenied { .. } => ErrorCategory::Permission,
            PrestoError::UnsupportedEnvironment(_) | PrestoError::Platform(_) => {
                ErrorCategory::Environment
            }
            PrestoError::Backend { .. } => ErrorCategory::Backend,
            PrestoError::Network(_) => ErrorCategory::Network,
            PrestoError::SubscriptionState(_) | PrestoError::JobState(_) => ErrorCategory::State,
            PrestoError::Image(_) => ErrorCategory::Image,
            PrestoError::InvalidKey(_)
            | PrestoError::Io(_)
            | PrestoError::InvalidUrl(_)
            | PrestoError::Serialization(_)
            | PrestoError::Config(_) => ErrorCategory::Config,
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        let remediation = match self {
            PrestoError::TargetNotFound(_) => {
                "Make sure the document is rendered and visible before exporting."
            }
            PrestoError::CrossOriginAsset { .. } => {
                "Serve images from the application origin or add their origin to capture.allowed_origins."
            }
            PrestoError::CaptureTimeout(_) => {
                "Wait for the document to finish loading, or raise capture.timeout."
            }
            PrestoError::EmptyCapture { .. } => {
                "The document has no visible content; fill it in before exporting."
            }
            PrestoError::PermissionDenied { blocked: true } => {
                "Notifications are blocked for this site. Allow them in the browser's site settings, then try again."
            }
            PrestoError::PermissionDenied { blocked: false } => {
                "Accept the notification prompt to enable push notifications."
            }
            PrestoError::UnsupportedEnvironment(_) => {
                "Use a browser with service worker and push support over HTTPS."
            }
            PrestoError::Platform(_) => "Reload the page and retry; file an issue if persistent.",
            PrestoError::Backend { status, .. } => match status.map(|s| s.as_u16()) {
                Some(401) | Some(403) => "Sign in again; the session may have expired.",
                Some(code) if code >= 500 => "The server failed; retry in a moment.",
                _ => "Check the request data and retry.",
            },
            PrestoError::Network(_) => "Check connectivity/proxy/VPN and retry.",
            PrestoError::SubscriptionState(_) => {
                "Refresh the subscription status before subscribing or unsubscribing."
            }
            PrestoError::JobState(_) => "Start a new export instead of reusing a finished one.",
            PrestoError::Image(_) => "Retry the export; the captured image could not be encoded.",
            PrestoError::InvalidKey(_) => {
                "The server returned a malformed VAPID public key; check the push configuration."
            }
            PrestoError::Io(_) => "Check the output directory path and permissions.",
            PrestoError::InvalidUrl(_) => "Verify backend.base_url (e.g., https://api.example.com/).",
            PrestoError::Serialization(_) => "Check the response format of the backend.",
            PrestoError::Config(_) => "Check the configuration file values.",
        };
        ErrorPayload::new(self.category(), self.to_string(), remediation)
    }
}

pub type Result<T> = std::result::Result<T, PrestoError>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Capture,
    Permission,
    Environment,
    Backend,
    Network,
    State,
    Image,
    Config,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub category: ErrorCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl ErrorPayload {
    pub fn new(category: ErrorCategory, message: String, remediation: impl Into<String>) -> Self {
        Self {
            category,
            message,
            remediation: Some(remediation.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_permission_points_at_site_settings() {
        let payload = PrestoError::PermissionDenied { blocked: true }.to_payload();
        assert_eq!(payload.category, ErrorCategory::Permission);
        let remediation = payload.remediation.unwrap_or_default();
        assert!(
            remediation.contains("site settings"),
            "expected site settings guidance, got: {remediation}"
        );
    }

    #[test]
    fn dismissed_permission_suggests_accepting_prompt() {
        let remediation = PrestoError::PermissionDenied { blocked: false }
            .to_payload()
            .remediation
            .unwrap_or_default();
        assert!(remediation.contains("prompt"), "got: {remediation}");
    }

    #[test]
    fn backend_unauthorized_suggests_sign_in() {
        let err = PrestoError::backend(Some(StatusCode::UNAUTHORIZED), "token expired");
        let payload = err.to_payload();
        assert_eq!(payload.category, ErrorCategory::Backend);
        assert!(payload
            .remediation
            .unwrap_or_default()
            .contains("Sign in again"));
    }

    #[test]
    fn backend_server_error_suggests_retry() {
        let err = PrestoError::backend(Some(StatusCode::BAD_GATEWAY), "upstream down");
        let remediation = err.to_payload().remediation.unwrap_or_default();
        assert!(remediation.contains("retry"), "got: {remediation}");
    }

    #[test]
    fn capture_errors_share_category() {
        assert_eq!(
            PrestoError::TargetNotFound("#budget".into()).category(),
            ErrorCategory::Capture
        );
        assert_eq!(
            PrestoError::CaptureTimeout(Duration::from_secs(3)).category(),
            ErrorCategory::Capture
        );
        assert_eq!(
            PrestoError::EmptyCapture {
                width: 0,
                height: 10
            }
            .category(),
            ErrorCategory::Capture
        );
    }

    #[test]
    fn payload_serializes_in_camel_case() {
        let payload = PrestoError::SubscriptionState("no live subscription".into()).to_payload();
        let json = serde_json::to_value(&payload).expect("serialize payload");
        assert_eq!(json["category"], "state");
        assert!(json["message"]
            .as_str()
            .unwrap_or_default()
            .contains("no live subscription"));
        assert!(json.get("remediation").is_some());
    }
}
