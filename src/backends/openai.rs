//! OpenAI chat-completion backend
//!
//! Hosted API authenticated with a bearer key. Streams by default, reading
//! server-sent events from `/v1/chat/completions`.

use super::http::{HttpTransport, PROBE_TIMEOUT};
use super::state::ClientState;
use super::stream::{LineBuffer, SSE_DONE, StreamAccumulator, sse_data};
use super::BackendClient;
use crate::clock::{SharedClock, unix_millis};
use crate::config::Endpoint;
use crate::error::BackendError;
use crate::normalize::normalize;
use crate::types::{CanonicalResponse, HealthStatus, InferenceRequest, ModelInfo, Operation};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Method;
use reqwest::header::CONTENT_TYPE;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::mpsc;

pub const DEFAULT_MODEL: &str = "gpt-4";

const HISTORY_CAPACITY: usize = 50;
const DEFAULT_MAX_TOKENS: u64 = 4000;
const DEFAULT_TEMPERATURE: f64 = 0.7;
const DEFAULT_TOP_P: f64 = 1.0;

/// Body fields the client owns; request options never replace them
const RESERVED_BODY_KEYS: [&str; 3] = ["model", "messages", "stream"];

const EVENT_STREAM: &str = "text/event-stream";

const CHAT_MODEL_MARKERS: [&str; 3] = ["gpt", "o3", "o4"];
const NON_CHAT_MARKERS: [&str; 5] = ["whisper", "tts", "dall-e", "instruct", "embedding"];

#[derive(Debug)]
pub struct OpenAiClient {
    endpoint: Endpoint,
    http: HttpTransport,
    state: ClientState,
}

impl OpenAiClient {
    /// # Errors
    ///
    /// Returns [`BackendError::MissingApiKey`] when the endpoint has no
    /// non-empty `api_key`.
    pub fn new(
        endpoint: Endpoint,
        timeout: Duration,
        clock: SharedClock,
    ) -> Result<Self, BackendError> {
        let api_key = endpoint
            .api_key()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| BackendError::MissingApiKey {
                endpoint: endpoint.name().to_string(),
            })?
            .to_string();

        let base_url = api_base_url(endpoint.url());
        let http = HttpTransport::new(&base_url, endpoint.name(), timeout, Some(api_key))?;
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

    pub fn base_url(&self) -> &str {
        self.http.base_url()
    }

    fn model_for(&self, request: &InferenceRequest) -> String {
        request
            .model
            .as_deref()
            .or(self.endpoint.model())
            .unwrap_or(DEFAULT_MODEL)
            .to_string()
    }

    fn request_body(&self, request: &InferenceRequest, model: &str, stream: bool) -> Value {
        let mut body = json!({
            "model": model,
            "messages": request.input.to_messages(),
            "stream": stream,
            "max_tokens": DEFAULT_MAX_TOKENS,
            "temperature": DEFAULT_TEMPERATURE,
            "top_p": DEFAULT_TOP_P,
        });
        if let Some(fields) = body.as_object_mut() {
            for (key, value) in &request.options {
                if RESERVED_BODY_KEYS.contains(&key.as_str()) {
                    tracing::debug!(
                        endpoint = %self.endpoint.name(),
                        option = %key,
                        "Ignoring option that would replace a request field"
                    );
                    continue;
                }
                fields.insert(key.clone(), value.clone());
            }
        }
        body
    }

    async fn complete(
        &self,
        operation: Operation,
        request: &InferenceRequest,
        sink: Option<mpsc::Sender<CanonicalResponse>>,
    ) -> Result<CanonicalResponse, BackendError> {
        let model = self.model_for(request);
        let stream = sink.is_some() || request.stream.unwrap_or(true);
        let body = self.request_body(request, &model, stream);

        let mut guard = self.state.begin_request(operation);
        tracing::debug!(
            endpoint = %self.endpoint.name(),
            operation = %operation,
            model = %model,
            stream,
            "Sending chat completion"
        );

        let response = if stream {
            self.read_sse(&body, &model, sink).await?
        } else {
            let value = self.http.post_json("/chat/completions", &body).await?;
            normalize(Some(&value), &model)?
        };

        guard.succeed();
        Ok(response)
    }

    async fn read_sse(
        &self,
        body: &Value,
        model: &str,
        sink: Option<mpsc::Sender<CanonicalResponse>>,
    ) -> Result<CanonicalResponse, BackendError> {
        let response = self
            .http
            .send(self.http.request(Method::POST, "/chat/completions").json(body))
            .await?;

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains(EVENT_STREAM));
        if !is_event_stream {
            tracing::debug!(
                endpoint = %self.endpoint.name(),
                "Streaming request answered with a plain body"
            );
            let value = self.http.read_json(response).await?;
            let reply = normalize(Some(&value), model)?;
            if let Some(sink) = sink {
                let _ = sink.send(reply.clone()).await;
            }
            return Ok(reply);
        }

        let mut accumulator = StreamAccumulator::new(model, sink);
        let mut lines = LineBuffer::new();
        let mut bytes = response.bytes_stream();
        let mut saw_event = false;

        'outer: while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|e| self.http.map_error(e, self.http.timeout()))?;
            for line in lines.push(&chunk) {
                match self.apply_event(&line, &mut accumulator).await? {
                    SseEvent::Skipped => {}
                    SseEvent::Data => saw_event = true,
                    SseEvent::Done => {
                        saw_event = true;
                        break 'outer;
                    }
                }
            }
        }
        if let Some(line) = lines.finish() {
            if self.apply_event(&line, &mut accumulator).await? != SseEvent::Skipped {
                saw_event = true;
            }
        }

        if !saw_event {
            return Err(self.http.decode_error("stream ended without any events"));
        }
        Ok(accumulator.finish().await)
    }

    /// Fold one SSE line into the accumulator
    async fn apply_event(
        &self,
        line: &str,
        accumulator: &mut StreamAccumulator,
    ) -> Result<SseEvent, BackendError> {
        let Some(data) = sse_data(line) else {
            return Ok(SseEvent::Skipped);
        };
        if data == SSE_DONE {
            return Ok(SseEvent::Done);
        }

        let event: Value = serde_json::from_str(data).map_err(|e| self.http.decode_error(e))?;
        if let Some(message) = event.pointer("/error/message").and_then(Value::as_str) {
            return Err(self.http.decode_error(format!("stream error: {}", message)));
        }
        if let Some(model) = event.get("model").and_then(Value::as_str) {
            accumulator.set_model(model);
        }
        if let Some(delta) = event
            .pointer("/choices/0/delta/content")
            .and_then(Value::as_str)
        {
            accumulator.push(delta).await;
        }
        Ok(SseEvent::Data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SseEvent {
    /// Comment, keep-alive or non-data line
    Skipped,
    Data,
    /// The `[DONE]` sentinel
    Done,
}

/// Base URL with a `/v1` suffix
fn api_base_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    if trimmed.ends_with("/v1") {
        trimmed.to_string()
    } else {
        format!("{}/v1", trimmed)
    }
}

/// Whether a model id names a chat-capable model
pub fn is_chat_model(id: &str) -> bool {
    CHAT_MODEL_MARKERS.iter().any(|m| id.contains(m))
        && !NON_CHAT_MARKERS.iter().any(|m| id.contains(m))
}

fn model_family(id: &str) -> &'static str {
    if id.contains("o3") || id.contains("o4") {
        "o-series"
    } else if id.contains("gpt-4.1") {
        "gpt-4.1"
    } else if id.contains("gpt-4") {
        "gpt-4"
    } else if id.contains("gpt-3.5") {
        "gpt-3.5"
    } else {
        "gpt"
    }
}

#[async_trait]
impl BackendClient for OpenAiClient {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn state(&self) -> &ClientState {
        &self.state
    }

    async fn generate(&self, request: &InferenceRequest) -> Result<CanonicalResponse, BackendError> {
        self.complete(Operation::Generate, request, None).await
    }

    async fn chat(&self, request: &InferenceRequest) -> Result<CanonicalResponse, BackendError> {
        self.complete(Operation::Chat, request, None).await
    }

    async fn chat_stream(
        &self,
        request: &InferenceRequest,
        sink: mpsc::Sender<CanonicalResponse>,
    ) -> Result<CanonicalResponse, BackendError> {
        self.complete(Operation::Chat, request, Some(sink)).await
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, BackendError> {
        let value = self.http.get_json("/models").await?;
        let models = value
            .get("data")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|m| m.get("id").and_then(Value::as_str))
                    .filter(|id| is_chat_model(id))
                    .map(|id| ModelInfo {
                        name: id.to_string(),
                        format: Some("openai".to_string()),
                        family: Some(model_family(id).to_string()),
                        ..ModelInfo::default()
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(models)
    }

    async fn get_health(&self) -> Result<HealthStatus, BackendError> {
        self.http
            .send_within(self.http.request(Method::GET, "/models"), PROBE_TIMEOUT)
            .await?;

        Ok(HealthStatus {
            status: "ok".to_string(),
            version: "OpenAI API".to_string(),
            running_models: 0,
            current_model: None,
            checked_at: unix_millis(self.state.clock().system_now()),
        })
    }

    async fn refresh_running_models(&self) -> Result<Vec<String>, BackendError> {
        self.state.set_running_models(Vec::new());
        Ok(Vec::new())
    }
}
