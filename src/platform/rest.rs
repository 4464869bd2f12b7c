use reqwest::{Client, Method, StatusCode};
use serde_json::Value;

use super::PlatformError;

/// Thin REST client both adapters share; Fluxer speaks a Discord-compatible
/// HTTP dialect, so only hosts and capability flags differ.
pub(super) struct RestClient {
    http: Client,
    api_base: String,
    token: String,
}

impl RestClient {
    pub(super) fn new(api_base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            api_base: api_base.into(),
            token: token.into(),
        }
    }

    pub(super) async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, PlatformError> {
        let url = format!("{}{}", self.api_base, path);
        let mut request = self
            .http
            .request(method, &url)
            .header("Authorization", format!("Bot {}", self.token));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PlatformError::Transient(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        let payload: Value = if status == StatusCode::NO_CONTENT {
            Value::Null
        } else {
            response.json().await.unwrap_or(Value::Null)
        };

        if status.is_success() {
            return Ok(payload);
        }
        Err(map_error(status, &payload))
    }

    pub(super) async fn get(&self, path: &str) -> Result<Value, PlatformError> {
        self.request(Method::GET, path, None).await
    }

    pub(super) async fn post(&self, path: &str, body: &Value) -> Result<Value, PlatformError> {
        self.request(Method::POST, path, Some(body)).await
    }

    pub(super) async fn patch(&self, path: &str, body: &Value) -> Result<Value, PlatformError> {
        self.request(Method::PATCH, path, Some(body)).await
    }

    pub(super) async fn delete(&self, path: &str) -> Result<Value, PlatformError> {
        self.request(Method::DELETE, path, None).await
    }
}

fn map_error(status: StatusCode, payload: &Value) -> PlatformError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        // Platforms report retry_after in (fractional) seconds.
        let retry_after_ms = payload
            .get("retry_after")
            .and_then(Value::as_f64)
            .map_or(1_000, |secs| (secs * 1000.0).ceil() as u64);
        return PlatformError::RateLimited { retry_after_ms };
    }

    let message = payload
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("no error body")
        .to_string();

    if status.is_server_error() {
        PlatformError::Transient(format!("{status}: {message}"))
    } else {
        PlatformError::Permanent {
            status: status.as_u16(),
            message,
        }
    }
}

/// Best-effort impersonation for native sends: platforms without per-message
/// display names get the author folded into the body.
pub(super) fn impersonated_body(author_name: &str, content: &str) -> String {
    format!("**{author_name}**: {content}")
}
