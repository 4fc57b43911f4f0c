//! Remote record service boundary.
//!
//! Verb-per-action HTTP contract consumed by the orchestrator and façade.
//! The service is a trait seam so the engine stays independent of the
//! transport; `HttpRemoteService` is the production client.

use crate::config::RemoteConfig;
use crate::error::SyncError;
use crate::task::Action;
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Response envelope spoken by the record service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiEnvelope {
    /// An envelope shaped like a successful server response, for optimistic
    /// offline replies.
    pub fn synthesized(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            error: None,
        }
    }
}

/// The remote service seam.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Execute one mutation with the action-appropriate verb.
    async fn execute(
        &self,
        action: Action,
        endpoint: &str,
        payload: Option<&Value>,
    ) -> Result<ApiEnvelope, SyncError>;

    /// Read a resource collection.
    async fn fetch(&self, endpoint: &str) -> Result<ApiEnvelope, SyncError>;
}

/// Classify a non-2xx status into the retry taxonomy.
///
/// 408 and 429 are operationally transient despite being 4xx; every other
/// 4xx is a rejected mutation that cannot succeed on replay.
pub fn classify_status(status: u16, body: &str) -> SyncError {
    let detail = body.chars().take(200).collect::<String>();
    match status {
        408 | 429 => SyncError::Transient(format!("status {}: {}", status, detail)),
        400..=499 => SyncError::Rejected(format!("status {}: {}", status, detail)),
        _ => SyncError::Transient(format!("status {}: {}", status, detail)),
    }
}

fn map_transport_error(error: reqwest::Error) -> SyncError {
    if error.is_timeout() {
        SyncError::Transient(format!("request timeout: {}", error))
    } else if error.is_connect() {
        SyncError::Unreachable(format!("connection error: {}", error))
    } else {
        SyncError::Transient(format!("transport error: {}", error))
    }
}

/// Join the configured base URL with a logical endpoint.
///
/// Callers may pass endpoints with or without the base's API prefix; the
/// prefix is never doubled.
fn join_url(base: &str, endpoint: &str) -> String {
    let base = base.trim_end_matches('/');
    let endpoint = if endpoint.starts_with('/') {
        endpoint.to_string()
    } else {
        format!("/{}", endpoint)
    };

    let path_start = base.find("://").map(|i| i + 3).unwrap_or(0);
    if let Some(slash) = base[path_start..].find('/') {
        let prefix = &base[path_start + slash..];
        if endpoint == prefix || endpoint.starts_with(&format!("{}/", prefix)) {
            return format!("{}{}", &base[..path_start + slash], endpoint);
        }
    }
    format!("{}{}", base, endpoint)
}

/// Production HTTP client for the record service.
pub struct HttpRemoteService {
    client: Client,
    base_url: String,
    bearer_token: RwLock<Option<String>>,
}

impl HttpRemoteService {
    pub fn new(config: &RemoteConfig) -> Result<Self, SyncError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| SyncError::ConfigError(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            bearer_token: RwLock::new(config.bearer_token.clone()),
        })
    }

    /// Install or clear the bearer credential used on every request.
    pub fn set_bearer_token(&self, token: Option<String>) {
        *self.bearer_token.write() = token;
    }

    async fn send(
        &self,
        method: Method,
        endpoint: &str,
        payload: Option<&Value>,
    ) -> Result<ApiEnvelope, SyncError> {
        let url = join_url(&self.base_url, endpoint);
        let mut request = self.client.request(method, &url);
        if let Some(token) = self.bearer_token.read().as_deref() {
            request = request.bearer_auth(token);
        }
        if let Some(body) = payload {
            request = request.json(body);
        }

        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SyncError::Transient(format!("failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(classify_status(status.as_u16(), &body));
        }
        serde_json::from_str(&body)
            .map_err(|e| SyncError::InvalidResponse(format!("malformed envelope: {}", e)))
    }
}

#[async_trait]
impl RemoteService for HttpRemoteService {
    async fn execute(
        &self,
        action: Action,
        endpoint: &str,
        payload: Option<&Value>,
    ) -> Result<ApiEnvelope, SyncError> {
        let method = match action {
            Action::Create => Method::POST,
            Action::Update => Method::PUT,
            Action::Delete => Method::DELETE,
        };
        self.send(method, endpoint, payload).await
    }

    async fn fetch(&self, endpoint: &str) -> Result<ApiEnvelope, SyncError> {
        self.send(Method::GET, endpoint, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classification_follows_the_retry_taxonomy() {
        assert!(matches!(classify_status(500, ""), SyncError::Transient(_)));
        assert!(matches!(classify_status(503, ""), SyncError::Transient(_)));
        assert!(matches!(classify_status(408, ""), SyncError::Transient(_)));
        assert!(matches!(classify_status(429, ""), SyncError::Transient(_)));
        assert!(matches!(classify_status(400, ""), SyncError::Rejected(_)));
        assert!(matches!(classify_status(404, ""), SyncError::Rejected(_)));
        assert!(matches!(classify_status(422, ""), SyncError::Rejected(_)));
    }

    #[test]
    fn join_url_never_doubles_the_api_prefix() {
        assert_eq!(
            join_url("http://localhost:3000/api", "/widgets"),
            "http://localhost:3000/api/widgets"
        );
        assert_eq!(
            join_url("http://localhost:3000/api", "/api/widgets"),
            "http://localhost:3000/api/widgets"
        );
        assert_eq!(
            join_url("http://localhost:3000/api/", "widgets/7"),
            "http://localhost:3000/api/widgets/7"
        );
        assert_eq!(
            join_url("http://localhost:3000", "/widgets"),
            "http://localhost:3000/widgets"
        );
    }

    #[test]
    fn envelope_tolerates_missing_optional_fields() {
        let envelope: ApiEnvelope = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert!(envelope.success);
        assert!(envelope.data.is_none());
        assert!(envelope.error.is_none());
    }

    #[test]
    fn synthesized_envelope_is_shaped_like_a_success() {
        let envelope = ApiEnvelope::synthesized(json!({"id": "temp_1"}));
        assert!(envelope.success);
        assert_eq!(envelope.data, Some(json!({"id": "temp_1"})));
    }
}
