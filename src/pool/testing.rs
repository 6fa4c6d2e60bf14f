//! In-memory backend used by pool unit tests

use crate::backends::{BackendClient, ClientState};
use crate::clock::{SharedClock, unix_millis};
use crate::config::{BackendType, Endpoint};
use crate::error::{BackendError, NormalizeError};
use crate::types::{CanonicalResponse, HealthStatus, InferenceRequest, ModelInfo, Operation};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// What the next inference call returns
#[derive(Debug, Clone)]
pub enum Script {
    Reply(String),
    FailStatus(u16),
    NotSupported,
    NoModel,
    Null,
}

#[derive(Debug)]
pub struct ScriptedClient {
    endpoint: Endpoint,
    state: ClientState,
    script: Mutex<Script>,
    reachable: AtomicBool,
    calls: AtomicUsize,
    probes: AtomicUsize,
    refreshes: AtomicUsize,
}

impl ScriptedClient {
    pub fn new(name: &str, priority: u32, max_retries: u32, clock: SharedClock) -> Arc<Self> {
        let endpoint = Endpoint::new(format!("http://{}.test", name), BackendType::Ollama)
            .with_name(name)
            .with_priority(priority)
            .with_max_retries(max_retries);
        Arc::new(Self {
            state: ClientState::new(name, max_retries, 10, clock),
            endpoint,
            script: Mutex::new(Script::Reply(format!("hello from {}", name))),
            reachable: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
        })
    }

    pub fn set_script(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    fn respond(&self, operation: Operation) -> Result<CanonicalResponse, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.state.begin_request(operation);
        let script = self.script.lock().unwrap().clone();
        let name = self.endpoint.name().to_string();

        let result = match script {
            Script::Reply(text) => Ok(CanonicalResponse::assistant(text, name, true)),
            Script::FailStatus(status) => Err(BackendError::Status {
                message: format!("{} is down", name),
                endpoint: name,
                status,
            }),
            Script::NotSupported => Err(self.unsupported(operation.as_str())),
            Script::NoModel => Err(BackendError::NoModelLoaded { endpoint: name }),
            Script::Null => Err(NormalizeError::NullResponse.into()),
        };
        if result.is_ok() {
            guard.succeed();
        }
        result
    }
}

#[async_trait]
impl BackendClient for ScriptedClient {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn state(&self) -> &ClientState {
        &self.state
    }

    async fn generate(&self, _request: &InferenceRequest) -> Result<CanonicalResponse, BackendError> {
        self.respond(Operation::Generate)
    }

    async fn chat(&self, _request: &InferenceRequest) -> Result<CanonicalResponse, BackendError> {
        self.respond(Operation::Chat)
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, BackendError> {
        self.respond(Operation::ListModels)?;
        Ok(vec![ModelInfo::named(self.endpoint.name())])
    }

    async fn get_health(&self) -> Result<HealthStatus, BackendError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(BackendError::Transport {
                endpoint: self.endpoint.name().to_string(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(HealthStatus {
            status: "ok".to_string(),
            version: "scripted".to_string(),
            running_models: self.state.running_models().len(),
            current_model: None,
            checked_at: unix_millis(self.state.clock().system_now()),
        })
    }

    async fn refresh_running_models(&self) -> Result<Vec<String>, BackendError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.running_models())
    }
}
