//! Ollama backend
//!
//! Full-featured local model server:
//! - `/api/generate` and `/api/chat`, optionally streamed as NDJSON
//! - `/api/tags`, `/api/ps`, `/api/version`
//! - model management under `/api/{show,create,copy,delete,pull,push}`
//! - `/api/embed` and `HEAD /api/blobs/{digest}`

use super::http::{HttpTransport, PROBE_TIMEOUT};
use super::state::ClientState;
use super::stream::{LineBuffer, StreamAccumulator};
use super::BackendClient;
use crate::clock::{SharedClock, unix_millis};
use crate::config::Endpoint;
use crate::error::BackendError;
use crate::normalize::normalize;
use crate::types::{
    CanonicalResponse, CreateModelRequest, EmbedRequest, HealthStatus, InferenceRequest,
    ModelDetails, ModelInfo, Operation, OperationStatus,
};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Method;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::mpsc;

/// Model used when neither the request nor the endpoint names one
pub const DEFAULT_MODEL: &str = "llama3.2:1b";

const HISTORY_CAPACITY: usize = 10;

#[derive(Debug)]
pub struct OllamaClient {
    endpoint: Endpoint,
    http: HttpTransport,
    state: ClientState,
}

impl OllamaClient {
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

    fn model_for(&self, request: &InferenceRequest) -> String {
        request
            .model
            .as_deref()
            .or(self.endpoint.model())
            .unwrap_or(DEFAULT_MODEL)
            .to_string()
    }

    fn request_body(
        &self,
        operation: Operation,
        request: &InferenceRequest,
        model: &str,
        stream: bool,
    ) -> Value {
        let mut body = json!({
            "model": model,
            "stream": stream,
        });

        if operation == Operation::Chat {
            body["messages"] = json!(request.input.to_messages());
        } else {
            body["prompt"] = json!(request.input.to_prompt());
        }

        if !request.options.is_empty() {
            body["options"] = Value::Object(request.options.clone());
        }
        body
    }

    async fn infer(
        &self,
        operation: Operation,
        request: &InferenceRequest,
        sink: Option<mpsc::Sender<CanonicalResponse>>,
    ) -> Result<CanonicalResponse, BackendError> {
        let path = match operation {
            Operation::Chat => "/api/chat",
            _ => "/api/generate",
        };
        let model = self.model_for(request);
        let stream = sink.is_some() || request.stream.unwrap_or(false);
        let body = self.request_body(operation, request, &model, stream);

        let mut guard = self.state.begin_request(operation);
        tracing::debug!(
            endpoint = %self.endpoint.name(),
            operation = %operation,
            model = %model,
            stream,
            "Sending request to Ollama"
        );

        let response = if stream {
            self.read_ndjson(path, &body, &model, sink).await?
        } else {
            let value = self.http.post_json(path, &body).await?;
            normalize(Some(&value), &model)?
        };

        guard.succeed();
        Ok(response)
    }

    /// Consume an NDJSON stream into one canonical reply
    async fn read_ndjson(
        &self,
        path: &str,
        body: &Value,
        model: &str,
        sink: Option<mpsc::Sender<CanonicalResponse>>,
    ) -> Result<CanonicalResponse, BackendError> {
        let response = self
            .http
            .send(self.http.request(Method::POST, path).json(body))
            .await?;

        let mut accumulator = StreamAccumulator::new(model, sink);
        let mut lines = LineBuffer::new();
        let mut bytes = response.bytes_stream();

        'outer: while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|e| self.http.map_error(e, self.http.timeout()))?;
            for line in lines.push(&chunk) {
                if self.apply_line(&line, &mut accumulator).await? {
                    break 'outer;
                }
            }
        }
        if let Some(line) = lines.finish() {
            self.apply_line(&line, &mut accumulator).await?;
        }

        Ok(accumulator.finish().await)
    }

    /// Fold one NDJSON line into the accumulator; returns `true` on `done`
    async fn apply_line(
        &self,
        line: &str,
        accumulator: &mut StreamAccumulator,
    ) -> Result<bool, BackendError> {
        let value: Value = serde_json::from_str(line).map_err(|e| self.http.decode_error(e))?;

        if let Some(error) = value.get("error").and_then(Value::as_str) {
            return Err(self.http.decode_error(format!("stream error: {}", error)));
        }
        if let Some(model) = value.get("model").and_then(Value::as_str) {
            accumulator.set_model(model);
        }

        let delta = value
            .pointer("/message/content")
            .or_else(|| value.get("response"))
            .and_then(Value::as_str)
            .unwrap_or("");
        accumulator.push(delta).await;

        Ok(value.get("done").and_then(Value::as_bool).unwrap_or(false))
    }

    async fn post_status(&self, path: &str, body: Value) -> Result<OperationStatus, BackendError> {
        let value = self.http.post_json(path, &body).await?;
        let status = value
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("success")
            .to_string();
        Ok(OperationStatus { status })
    }
}

fn model_info_from_tag(entry: &Value) -> Option<ModelInfo> {
    let name = entry
        .get("name")
        .or_else(|| entry.get("model"))
        .and_then(Value::as_str)?;
    let detail = |key: &str| {
        entry
            .pointer(&format!("/details/{}", key))
            .and_then(Value::as_str)
            .map(String::from)
    };

    Some(ModelInfo {
        name: name.to_string(),
        size: entry.get("size").and_then(Value::as_u64),
        family: detail("family"),
        format: detail("format"),
        parameter_size: detail("parameter_size"),
        modified_at: entry
            .get("modified_at")
            .and_then(Value::as_str)
            .map(String::from),
    })
}

#[async_trait]
impl BackendClient for OllamaClient {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn state(&self) -> &ClientState {
        &self.state
    }

    async fn generate(&self, request: &InferenceRequest) -> Result<CanonicalResponse, BackendError> {
        self.infer(Operation::Generate, request, None).await
    }

    async fn chat(&self, request: &InferenceRequest) -> Result<CanonicalResponse, BackendError> {
        self.infer(Operation::Chat, request, None).await
    }

    async fn chat_stream(
        &self,
        request: &InferenceRequest,
        sink: mpsc::Sender<CanonicalResponse>,
    ) -> Result<CanonicalResponse, BackendError> {
        self.infer(Operation::Chat, request, Some(sink)).await
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, BackendError> {
        let value = self.http.get_json("/api/tags").await?;
        Ok(value
            .get("models")
            .and_then(Value::as_array)
            .map(|models| models.iter().filter_map(model_info_from_tag).collect())
            .unwrap_or_default())
    }

    async fn get_health(&self) -> Result<HealthStatus, BackendError> {
        let response = self
            .http
            .send_within(self.http.request(Method::GET, "/api/version"), PROBE_TIMEOUT)
            .await?;
        let value = self.http.read_json(response).await?;
        let version = value
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        if let Err(e) = self.refresh_running_models().await {
            tracing::warn!(
                endpoint = %self.endpoint.name(),
                error = %e,
                "Failed to refresh running models during health check"
            );
        }

        Ok(HealthStatus {
            status: "healthy".to_string(),
            version,
            running_models: self.state.running_models().len(),
            current_model: None,
            checked_at: unix_millis(self.state.clock().system_now()),
        })
    }

    async fn refresh_running_models(&self) -> Result<Vec<String>, BackendError> {
        let value = self.http.get_json("/api/ps").await?;
        let names: Vec<String> = value
            .get("models")
            .and_then(Value::as_array)
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.get("name").or_else(|| m.get("model")))
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        self.state.set_running_models(names.clone());
        Ok(names)
    }

    async fn show_model(&self, model: &str) -> Result<ModelDetails, BackendError> {
        let value = self
            .http
            .post_json("/api/show", &json!({ "model": model }))
            .await?;
        let text = |pointer: &str| value.pointer(pointer).and_then(Value::as_str).map(String::from);

        Ok(ModelDetails {
            name: model.to_string(),
            format: text("/details/format"),
            family: text("/details/family"),
            parameter_size: text("/details/parameter_size"),
            quantization_level: text("/details/quantization_level"),
            modelfile: text("/modelfile"),
            template: text("/template"),
        })
    }

    async fn pull_model(&self, model: &str) -> Result<OperationStatus, BackendError> {
        self.post_status("/api/pull", json!({ "model": model, "stream": false }))
            .await
    }

    async fn push_model(&self, model: &str) -> Result<OperationStatus, BackendError> {
        self.post_status("/api/push", json!({ "model": model, "stream": false }))
            .await
    }

    async fn delete_model(&self, model: &str) -> Result<(), BackendError> {
        self.http
            .send(
                self.http
                    .request(Method::DELETE, "/api/delete")
                    .json(&json!({ "model": model })),
            )
            .await?;
        Ok(())
    }

    async fn create_model(
        &self,
        request: &CreateModelRequest,
    ) -> Result<OperationStatus, BackendError> {
        let mut body = serde_json::to_value(request).map_err(|e| self.http.decode_error(e))?;
        body["stream"] = json!(false);
        self.post_status("/api/create", body).await
    }

    async fn copy_model(&self, source: &str, destination: &str) -> Result<(), BackendError> {
        self.http
            .post_json(
                "/api/copy",
                &json!({ "source": source, "destination": destination }),
            )
            .await?;
        Ok(())
    }

    async fn embed(&self, request: &EmbedRequest) -> Result<Vec<Vec<f32>>, BackendError> {
        let value = self.http.post_json("/api/embed", request).await?;
        let embeddings = value.get("embeddings").cloned().unwrap_or(Value::Null);
        serde_json::from_value(embeddings).map_err(|e| self.http.decode_error(e))
    }

    async fn blob_exists(&self, digest: &str) -> Result<bool, BackendError> {
        let path = format!("/api/blobs/{}", digest);
        match self.http.send(self.http.request(Method::HEAD, &path)).await {
            Ok(_) => Ok(true),
            Err(BackendError::Status { status: 404, .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
