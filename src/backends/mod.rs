//! Backend client adapters
//!
//! One [`BackendClient`] implementation per backend family, each bound to a
//! single configured [`Endpoint`]. Clients translate their family's wire
//! protocol into the canonical types in [`crate::types`] and own the
//! per-endpoint [`ClientState`].

pub mod http;
pub mod ollama;
pub mod openai;
pub mod rkllama;
pub mod state;
pub mod stream;

pub use ollama::OllamaClient;
pub use openai::OpenAiClient;
pub use rkllama::RkllamaClient;
pub use state::{ClientState, RequestGuard, StateSnapshot};

use crate::clock::SharedClock;
use crate::config::{BackendType, Endpoint, TimeoutsConfig};
use crate::error::BackendError;
use crate::types::{
    CanonicalResponse, CreateModelRequest, EmbedRequest, HealthStatus, InferenceRequest,
    ModelDetails, ModelInfo, OperationStatus, ProcessingStatus,
};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Canonical operations over one backend endpoint
///
/// Core inference and probing operations are required. Model management and
/// residency operations default to [`BackendError::NotSupported`]; each
/// family overrides the ones its server offers.
#[async_trait]
pub trait BackendClient: Send + Sync + fmt::Debug {
    fn endpoint(&self) -> &Endpoint;

    fn state(&self) -> &ClientState;

    fn backend_type(&self) -> BackendType {
        self.endpoint().backend_type()
    }

    fn url(&self) -> &str {
        self.endpoint().url()
    }

    fn name(&self) -> &str {
        self.endpoint().name()
    }

    fn priority(&self) -> u32 {
        self.endpoint().priority()
    }

    fn is_eligible(&self) -> bool {
        self.state().is_eligible()
    }

    fn load_score(&self) -> usize {
        self.state().load_score()
    }

    fn processing_status(&self) -> ProcessingStatus {
        self.state().processing_status()
    }

    fn unsupported(&self, operation: &'static str) -> BackendError {
        BackendError::NotSupported {
            operation,
            backend: self.backend_type().as_str(),
        }
    }

    /// Single-turn generation
    async fn generate(&self, request: &InferenceRequest) -> Result<CanonicalResponse, BackendError>;

    /// Multi-turn chat
    async fn chat(&self, request: &InferenceRequest) -> Result<CanonicalResponse, BackendError>;

    /// Chat, forwarding incremental chunks to `sink` as they arrive
    ///
    /// The sink receives zero or more `done = false` chunks followed by one
    /// `done = true` chunk equal to the returned value. Families without
    /// streaming send only the terminal chunk.
    async fn chat_stream(
        &self,
        request: &InferenceRequest,
        sink: mpsc::Sender<CanonicalResponse>,
    ) -> Result<CanonicalResponse, BackendError> {
        let response = self.chat(request).await?;
        let _ = sink.send(response.clone()).await;
        Ok(response)
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, BackendError>;

    /// Raw health probe; errors when the backend is unreachable
    async fn get_health(&self) -> Result<HealthStatus, BackendError>;

    /// Fetch resident models and store them in the client state
    async fn refresh_running_models(&self) -> Result<Vec<String>, BackendError>;

    async fn show_model(&self, _model: &str) -> Result<ModelDetails, BackendError> {
        Err(self.unsupported("show_model"))
    }

    async fn pull_model(&self, _model: &str) -> Result<OperationStatus, BackendError> {
        Err(self.unsupported("pull_model"))
    }

    async fn push_model(&self, _model: &str) -> Result<OperationStatus, BackendError> {
        Err(self.unsupported("push_model"))
    }

    async fn delete_model(&self, _model: &str) -> Result<(), BackendError> {
        Err(self.unsupported("delete_model"))
    }

    async fn create_model(
        &self,
        _request: &CreateModelRequest,
    ) -> Result<OperationStatus, BackendError> {
        Err(self.unsupported("create_model"))
    }

    async fn copy_model(&self, _source: &str, _destination: &str) -> Result<(), BackendError> {
        Err(self.unsupported("copy_model"))
    }

    async fn embed(&self, _request: &EmbedRequest) -> Result<Vec<Vec<f32>>, BackendError> {
        Err(self.unsupported("embed"))
    }

    async fn blob_exists(&self, _digest: &str) -> Result<bool, BackendError> {
        Err(self.unsupported("blob_exists"))
    }

    async fn load_model(&self, _model: &str) -> Result<(), BackendError> {
        Err(self.unsupported("load_model"))
    }

    async fn unload_model(&self) -> Result<(), BackendError> {
        Err(self.unsupported("unload_model"))
    }

    async fn current_model(&self) -> Result<Option<String>, BackendError> {
        Err(self.unsupported("current_model"))
    }
}

/// Shared handle to a backend client
pub type SharedClient = Arc<dyn BackendClient>;

/// Build the client for an endpoint according to its backend type
pub fn create_client(
    endpoint: &Endpoint,
    timeouts: &TimeoutsConfig,
    clock: SharedClock,
) -> Result<SharedClient, BackendError> {
    let timeout = Duration::from_secs(timeouts.seconds_for(endpoint.backend_type()));

    tracing::info!(
        endpoint = %endpoint.name(),
        url = %endpoint.url(),
        backend_type = %endpoint.backend_type(),
        priority = endpoint.priority(),
        timeout_seconds = timeout.as_secs(),
        "Creating backend client"
    );

    let client: SharedClient = match endpoint.backend_type() {
        BackendType::Ollama => Arc::new(OllamaClient::new(endpoint.clone(), timeout, clock)?),
        BackendType::Rkllama => Arc::new(RkllamaClient::new(endpoint.clone(), timeout, clock)?),
        BackendType::Openai => Arc::new(OpenAiClient::new(endpoint.clone(), timeout, clock)?),
    };
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system_clock;

    #[test]
    fn test_factory_dispatches_on_backend_type() {
        let timeouts = TimeoutsConfig::default();
        for backend_type in [BackendType::Ollama, BackendType::Rkllama] {
            let endpoint = Endpoint::new("http://localhost:9", backend_type);
            let client = create_client(&endpoint, &timeouts, system_clock()).unwrap();
            assert_eq!(client.backend_type(), backend_type);
            assert!(client.is_eligible());
        }

        let endpoint =
            Endpoint::new("https://api.openai.com", BackendType::Openai).with_api_key("sk-x");
        let client = create_client(&endpoint, &timeouts, system_clock()).unwrap();
        assert_eq!(client.backend_type(), BackendType::Openai);
    }

    #[test]
    fn test_factory_rejects_openai_without_key() {
        let endpoint = Endpoint::new("https://api.openai.com", BackendType::Openai);
        let result = create_client(&endpoint, &TimeoutsConfig::default(), system_clock());
        assert!(matches!(result, Err(BackendError::MissingApiKey { .. })));
    }

    #[tokio::test]
    async fn test_default_management_ops_are_not_supported() {
        let endpoint = Endpoint::new("https://api.openai.com", BackendType::Openai).with_api_key("k");
        let client = create_client(&endpoint, &TimeoutsConfig::default(), system_clock()).unwrap();

        let err = client.copy_model("a", "b").await.unwrap_err();
        assert!(matches!(
            err,
            BackendError::NotSupported {
                operation: "copy_model",
                backend: "openai"
            }
        ));
        assert!(!err.is_retryable());
        assert!(client.unload_model().await.is_err());
    }
}
