use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::BackendConfig;
use crate::export::{BudgetDocument, BudgetRenderer};
use crate::push::{PushBackend, Subscription};
use crate::{PrestoError, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendAuth {
    Anonymous,
    Bearer(String),
}

impl BackendAuth {
    /// Bearer token from `var`, or anonymous when it is unset or empty.
    pub fn from_env(var: &str) -> Self {
        match std::env::var(var) {
            Ok(token) if !token.trim().is_empty() => Self::Bearer(token.trim().to_string()),
            _ => Self::Anonymous,
        }
    }

    fn apply(&self, builder: RequestBuilder) -> RequestBuilder {
        match self {
            BackendAuth::Anonymous => builder,
            BackendAuth::Bearer(token) => builder.bearer_auth(token),
        }
    }
}

/// REST client for the push broker and the budget renderer.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: Client,
    auth: BackendAuth,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
struct VapidKeyResponse {
    #[serde(rename = "publicKey")]
    public_key: String,
}

#[derive(Serialize)]
struct SubscribeRequest<'a> {
    subscription: &'a Subscription,
}

#[derive(Serialize)]
struct UnsubscribeRequest<'a> {
    endpoint: &'a str,
}

impl BackendClient {
    pub fn new(base_url: impl AsRef<str>, auth: BackendAuth) -> Result<Self> {
        Self::with_timeout(base_url, auth, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: impl AsRef<str>,
        auth: BackendAuth,
        timeout: Duration,
    ) -> Result<Self> {
        // Endpoints are joined relative to the base, which needs a trailing slash
        // to keep its last path segment.
        let mut raw = base_url.as_ref().trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base_url = Url::parse(&raw)?;

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(PrestoError::Network)?;

        Ok(Self {
            http,
            auth,
            base_url,
        })
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        Self::with_timeout(
            &config.base_url,
            BackendAuth::from_env(&config.token_env),
            config.timeout,
        )
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn fetch_vapid_public_key(&self) -> Result<String> {
        let url = self.endpoint("push/vapid-public-key")?;
        let response: VapidKeyResponse = self.send_json(self.authed(self.http.get(url))).await?;
        if response.public_key.trim().is_empty() {
            return Err(PrestoError::InvalidKey(
                "backend returned an empty public key".to_string(),
            ));
        }
        Ok(response.public_key)
    }

    pub async fn save_subscription(&self, subscription: &Subscription) -> Result<()> {
        let url = self.endpoint("push/subscribe")?;
        let req = self
            .authed(self.http.post(url))
            .json(&SubscribeRequest { subscription });
        self.send_empty(req).await
    }

    pub async fn delete_subscription(&self, subscription: &Subscription) -> Result<()> {
        let url = self.endpoint("push/unsubscribe")?;
        let req = self
            .authed(self.http.delete(url))
            .json(&UnsubscribeRequest {
                endpoint: &subscription.endpoint,
            });
        self.send_empty(req).await
    }

    pub async fn request_test_push(&self) -> Result<()> {
        let url = self.endpoint("push/test")?;
        self.send_empty(self.authed(self.http.post(url))).await
    }

    /// Server-side PDF rendering of a budget.
    pub async fn generate_budget_pdf(&self, document: &BudgetDocument) -> Result<Vec<u8>> {
        let url = self.endpoint("presupuestos/generar-pdf")?;
        let req = self.authed(self.http.post(url)).json(document);
        let bytes = self.send_bytes(req).await?;
        if !bytes.starts_with(b"%PDF") {
            return Err(PrestoError::backend(
                None,
                "budget endpoint did not return a PDF document",
            ));
        }
        Ok(bytes)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        self.auth.apply(builder)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(PrestoError::InvalidUrl)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(PrestoError::Network)?;
        let status = response.status();
        debug!(url = %response.url(), status = status.as_u16(), "Backend response");

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(PrestoError::backend(
            Some(status),
            error_message(status, &body),
        ))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let body = self
            .send(request)
            .await?
            .text()
            .await
            .map_err(PrestoError::Network)?;
        serde_json::from_str(&body).map_err(PrestoError::Serialization)
    }

    async fn send_empty(&self, request: RequestBuilder) -> Result<()> {
        self.send(request).await.map(|_| ())
    }

    async fn send_bytes(&self, request: RequestBuilder) -> Result<Vec<u8>> {
        self.send(request)
            .await?
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(PrestoError::Network)
    }
}

#[async_trait]
impl PushBackend for BackendClient {
    async fn vapid_public_key(&self) -> Result<String> {
        self.fetch_vapid_public_key().await
    }

    async fn register_subscription(&self, subscription: &Subscription) -> Result<()> {
        self.save_subscription(subscription).await
    }

    async fn remove_subscription(&self, subscription: &Subscription) -> Result<()> {
        self.delete_subscription(subscription).await
    }

    async fn send_test(&self) -> Result<()> {
        self.request_test_push().await
    }
}

#[async_trait]
impl BudgetRenderer for BackendClient {
    async fn render_budget(&self, document: &BudgetDocument) -> Result<Vec<u8>> {
        self.generate_budget_pdf(document).await
    }
}

fn error_message(status: StatusCode, body: &str) -> String {
    let fallback = format!("backend returned status {}", status.as_u16());
    let parsed = serde_json::from_str::<Value>(body).ok();
    parsed
        .as_ref()
        .and_then(|value| value.get("error").or_else(|| value.get("message")))
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or(fallback)
}
