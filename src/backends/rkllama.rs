//! RKLLama backend
//!
//! NPU-bound server that keeps at most one model resident. There is no chat
//! endpoint: conversations are flattened into a single prompt and sent to
//! `/api/generate` against whatever model is currently loaded.

use super::http::{HttpTransport, PROBE_TIMEOUT};
use super::state::ClientState;
use super::BackendClient;
use crate::clock::{SharedClock, unix_millis};
use crate::config::Endpoint;
use crate::error::BackendError;
use crate::normalize::normalize;
use crate::types::{
    CanonicalResponse, HealthStatus, InferenceRequest, ModelDetails, ModelInfo, Operation,
    OperationStatus,
};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Value, json};
use std::time::Duration;

const HISTORY_CAPACITY: usize = 10;
const MODEL_FORMAT: &str = "rkllm";
const MODEL_FAMILY: &str = "RKLLama";

#[derive(Debug)]
pub struct RkllamaClient {
    endpoint: Endpoint,
    http: HttpTransport,
    state: ClientState,
}

impl RkllamaClient {
    pub fn new(
        endpoint: Endpoint,
        timeout: Duration,
        clock: SharedClock,
    ) -> Result<Self, BackendError> {
        let http = HttpTransport::new(endpoint.url(), endpoint.name(), timeout, None)?;
        let state = ClientState::new(
            endpoint.name(),
            endpoint.max_retries(),
            HISTORY_CAPACITY,
            clock,
        );
        Ok(Self {
            endpoint,
            http,
            state,
        })
    }

    fn remember_current_model(&self, model: Option<String>) {
        let running = model.iter().cloned().collect();
        self.state.set_current_model(model);
        self.state.set_running_models(running);
    }

    /// Model currently resident on the NPU, from cache or the server
    async fn loaded_model(&self) -> Result<String, BackendError> {
        if let Some(model) = self.state.current_model() {
            return Ok(model);
        }
        self.current_model()
            .await?
            .ok_or_else(|| BackendError::NoModelLoaded {
                endpoint: self.endpoint.name().to_string(),
            })
    }

    async fn infer(
        &self,
        operation: Operation,
        request: &InferenceRequest,
    ) -> Result<CanonicalResponse, BackendError> {
        let mut guard = self.state.begin_request(operation);
        let model = self.loaded_model().await?;

        if let Some(requested) = request.model.as_deref()
            && requested != model
        {
            tracing::debug!(
                endpoint = %self.endpoint.name(),
                requested = %requested,
                loaded = %model,
                "Requested model differs from loaded model, using loaded model"
            );
        }

        let body = json!({
            "model": model,
            "prompt": request.input.to_prompt(),
            "stream": false,
        });
        let value = self.http.post_json("/api/generate", &body).await?;
        let response = normalize(Some(&value), &model)?;

        guard.succeed();
        Ok(response)
    }

    /// Whether the server already has `model` on disk
    pub async fn is_model_available(&self, model: &str) -> Result<bool, BackendError> {
        let models = self.list_models().await?;
        Ok(models.iter().any(|m| m.name == model))
    }

    /// Pull `model` if the server does not have it yet
    pub async fn ensure_model_available(&self, model: &str) -> Result<(), BackendError> {
        if !self.is_model_available(model).await? {
            tracing::info!(
                endpoint = %self.endpoint.name(),
                model = %model,
                "Model not present on endpoint, pulling"
            );
            self.pull_model(model).await?;
        }
        Ok(())
    }

    /// Make `model` the resident model
    ///
    /// Pulls it if missing and unloads any different model first.
    pub async fn ensure_model_loaded(&self, model: &str) -> Result<(), BackendError> {
        self.ensure_model_available(model).await?;

        match self.current_model().await? {
            Some(current) if current == model => return Ok(()),
            Some(current) => {
                tracing::info!(
                    endpoint = %self.endpoint.name(),
                    unloading = %current,
                    loading = %model,
                    "Switching resident model"
                );
                self.unload_model().await?;
            }
            None => {}
        }

        self.load_model(model).await
    }
}

fn model_info_from_entry(entry: &Value) -> Option<ModelInfo> {
    let name = entry
        .as_str()
        .or_else(|| entry.get("name").and_then(Value::as_str))?;
    Some(ModelInfo {
        format: Some(MODEL_FORMAT.to_string()),
        family: Some(MODEL_FAMILY.to_string()),
        ..ModelInfo::named(name)
    })
}

#[async_trait]
impl BackendClient for RkllamaClient {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn state(&self) -> &ClientState {
        &self.state
    }

    async fn generate(&self, request: &InferenceRequest) -> Result<CanonicalResponse, BackendError> {
        self.infer(Operation::Generate, request).await
    }

    async fn chat(&self, request: &InferenceRequest) -> Result<CanonicalResponse, BackendError> {
        self.infer(Operation::Chat, request).await
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, BackendError> {
        let value = self.http.get_json("/models").await?;
        Ok(value
            .get("models")
            .and_then(Value::as_array)
            .map(|models| models.iter().filter_map(model_info_from_entry).collect())
            .unwrap_or_default())
    }

    async fn get_health(&self) -> Result<HealthStatus, BackendError> {
        self.http
            .send_within(self.http.request(Method::GET, "/"), PROBE_TIMEOUT)
            .await?;

        let current_model = match self.current_model().await {
            Ok(model) => model,
            Err(e) => {
                tracing::debug!(
                    endpoint = %self.endpoint.name(),
                    error = %e,
                    "Could not read current model during health check"
                );
                self.remember_current_model(None);
                None
            }
        };

        Ok(HealthStatus {
            status: "healthy".to_string(),
            version: MODEL_FAMILY.to_string(),
            running_models: usize::from(current_model.is_some()),
            current_model,
            checked_at: unix_millis(self.state.clock().system_now()),
        })
    }

    async fn refresh_running_models(&self) -> Result<Vec<String>, BackendError> {
        match self.current_model().await {
            Ok(model) => Ok(model.into_iter().collect()),
            Err(e) => {
                tracing::debug!(
                    endpoint = %self.endpoint.name(),
                    error = %e,
                    "No running model reported, assuming none"
                );
                self.remember_current_model(None);
                Ok(Vec::new())
            }
        }
    }

    async fn show_model(&self, model: &str) -> Result<ModelDetails, BackendError> {
        Ok(ModelDetails {
            name: model.to_string(),
            format: Some(MODEL_FORMAT.to_string()),
            family: Some(MODEL_FAMILY.to_string()),
            parameter_size: Some("Unknown".to_string()),
            ..ModelDetails::default()
        })
    }

    async fn pull_model(&self, model: &str) -> Result<OperationStatus, BackendError> {
        let value = self.http.post_json("/pull", &json!({ "model": model })).await?;
        let status = value
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("success")
            .to_string();
        Ok(OperationStatus { status })
    }

    async fn delete_model(&self, model: &str) -> Result<(), BackendError> {
        self.http.post_json("/rm", &json!({ "model": model })).await?;
        Ok(())
    }

    async fn load_model(&self, model: &str) -> Result<(), BackendError> {
        self.http
            .post_json("/load_model", &json!({ "model_name": model }))
            .await?;
        self.remember_current_model(Some(model.to_string()));
        tracing::info!(endpoint = %self.endpoint.name(), model = %model, "Model loaded");
        Ok(())
    }

    async fn unload_model(&self) -> Result<(), BackendError> {
        self.http
            .send(self.http.request(Method::POST, "/unload_model"))
            .await?;
        self.remember_current_model(None);
        tracing::info!(endpoint = %self.endpoint.name(), "Model unloaded");
        Ok(())
    }

    async fn current_model(&self) -> Result<Option<String>, BackendError> {
        let model = match self.http.get_json("/current_model").await {
            Ok(value) => value
                .get("model_name")
                .and_then(Value::as_str)
                .filter(|name| !name.is_empty())
                .map(String::from),
            Err(BackendError::Status { status: 404, .. }) => None,
            Err(e) => return Err(e),
        };
        self.remember_current_model(model.clone());
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system_clock;
    use crate::config::BackendType;
    use crate::types::{CreateModelRequest, EmbedRequest};

    fn client() -> RkllamaClient {
        let endpoint = Endpoint::new("http://localhost:8080", BackendType::Rkllama);
        RkllamaClient::new(endpoint, Duration::from_secs(5), system_clock()).unwrap()
    }

    #[test]
    fn test_model_entries_accept_strings_and_objects() {
        let info = model_info_from_entry(&json!("qwen2.5-1.5b")).unwrap();
        assert_eq!(info.name, "qwen2.5-1.5b");
        assert_eq!(info.format.as_deref(), Some("rkllm"));
        assert_eq!(info.family.as_deref(), Some("RKLLama"));
        assert_eq!(info.size, None);

        let info = model_info_from_entry(&json!({"name": "deepseek"})).unwrap();
        assert_eq!(info.name, "deepseek");
        assert!(model_info_from_entry(&json!(42)).is_none());
    }

    #[tokio::test]
    async fn test_show_model_is_static_descriptor() {
        let details = client().show_model("anything").await.unwrap();
        assert_eq!(details.format.as_deref(), Some("rkllm"));
        assert_eq!(details.family.as_deref(), Some("RKLLama"));
    }

    #[tokio::test]
    async fn test_unsupported_operations_fail_without_io() {
        let client = client();
        let create = CreateModelRequest {
            model: "x".to_string(),
            from: None,
            system: None,
            template: None,
        };
        let embed = EmbedRequest {
            model: "x".to_string(),
            input: vec!["hi".to_string()],
        };

        assert!(matches!(
            client.create_model(&create).await,
            Err(BackendError::NotSupported { operation: "create_model", backend: "rkllama" })
        ));
        assert!(matches!(
            client.copy_model("a", "b").await,
            Err(BackendError::NotSupported { operation: "copy_model", .. })
        ));
        assert!(matches!(
            client.push_model("x").await,
            Err(BackendError::NotSupported { operation: "push_model", .. })
        ));
        assert!(matches!(
            client.embed(&embed).await,
            Err(BackendError::NotSupported { operation: "embed", .. })
        ));
        assert!(matches!(
            client.blob_exists("sha256:abc").await,
            Err(BackendError::NotSupported { operation: "blob_exists", .. })
        ));
    }

    #[test]
    fn test_remember_current_model_updates_running_models() {
        let client = client();
        client.remember_current_model(Some("qwen".to_string()));
        assert_eq!(client.state.running_models(), vec!["qwen".to_string()]);
        assert_eq!(client.load_score(), 1);

        client.remember_current_model(None);
        assert!(client.state.running_models().is_empty());
    }
}
