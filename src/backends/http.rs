//! Shared HTTP plumbing for backend clients
//!
//! Wraps a `reqwest::Client` bound to one endpoint and maps every transport
//! or protocol failure onto [`BackendError`].

use crate::error::BackendError;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// Budget for health probes, independent of the family timeout
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest slice of a non-JSON error body echoed into an error message
const MAX_ERROR_BODY_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    endpoint: String,
    timeout: Duration,
    bearer_token: Option<String>,
}

impl HttpTransport {
    /// Build a transport for `base_url`
    ///
    /// `endpoint` is the display name used in error messages.
    pub fn new(
        base_url: &str,
        endpoint: &str,
        timeout: Duration,
        bearer_token: Option<String>,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transport {
                endpoint: endpoint.to_string(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            endpoint: endpoint.to_string(),
            timeout,
            bearer_token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send a request with the family timeout and require a 2xx status
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response, BackendError> {
        self.send_within(builder, self.timeout).await
    }

    /// Send a request with an explicit timeout and require a 2xx status
    pub async fn send_within(
        &self,
        builder: RequestBuilder,
        timeout: Duration,
    ) -> Result<Response, BackendError> {
        let response = builder
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| self.map_error(e, timeout))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = error_message(status, &body);

        tracing::debug!(
            endpoint = %self.endpoint,
            status = status.as_u16(),
            message = %message,
            "Backend returned non-success status"
        );

        Err(BackendError::Status {
            endpoint: self.endpoint.clone(),
            status: status.as_u16(),
            message,
        })
    }

    /// Read a response body as JSON; an empty body reads as `null`
    pub async fn read_json(&self, response: Response) -> Result<Value, BackendError> {
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.map_error(e, self.timeout))?;

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }

        serde_json::from_slice(&bytes).map_err(|e| self.decode_error(e))
    }

    pub async fn get_json(&self, path: &str) -> Result<Value, BackendError> {
        let response = self.send(self.request(Method::GET, path)).await?;
        self.read_json(response).await
    }

    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Value, BackendError> {
        let response = self.send(self.request(Method::POST, path).json(body)).await?;
        self.read_json(response).await
    }

    /// Map a reqwest failure, classifying timeouts separately
    pub fn map_error(&self, err: reqwest::Error, timeout: Duration) -> BackendError {
        if err.is_timeout() {
            BackendError::Timeout {
                endpoint: self.endpoint.clone(),
                timeout_seconds: timeout.as_secs().max(1),
            }
        } else if err.is_decode() {
            BackendError::Decode {
                endpoint: self.endpoint.clone(),
                reason: err.to_string(),
            }
        } else {
            BackendError::Transport {
                endpoint: self.endpoint.clone(),
                reason: err.to_string(),
            }
        }
    }

    pub fn decode_error(&self, err: impl std::fmt::Display) -> BackendError {
        BackendError::Decode {
            endpoint: self.endpoint.clone(),
            reason: err.to_string(),
        }
    }
}

/// Pull a human-readable message out of an error body
///
/// Understands `{"error": "..."}` and `{"error": {"message": "..."}}`,
/// falling back to a prefix of the raw body, then the status reason.
fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        let message = json
            .get("error")
            .and_then(|e| e.as_str().or_else(|| e.get("message").and_then(Value::as_str)));
        if let Some(message) = message {
            return message.to_string();
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    } else {
        trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect()
    }
}
