//! Endpoint pool: selection, failover, and status
//!
//! The [`Pool`] owns one client per enabled endpoint, ordered by priority.
//! Every caller-facing operation runs the same state machine:
//!
//! ```text
//! SELECT -> INVOKE -> SUCCESS
//!             |
//!             +-> retryable failure -> next eligible client -> INVOKE ...
//!             +-> non-retryable failure -> surfaced as-is
//!             +-> nothing left -> AllBackendsFailed
//! ```
//!
//! The primary client comes from the configured [`SelectionStrategy`]; the
//! fallback sweep always walks the remaining eligible clients in priority
//! order, skipping any already attempted during the call.

pub mod backoff;
pub mod health;
pub mod strategy;

#[cfg(test)]
pub(crate) mod testing;

use crate::backends::{SharedClient, create_client};
use crate::clock::{SharedClock, system_clock, unix_millis};
use crate::config::{BackendType, Config, PoolConfig};
use crate::error::{BackendError, PoolError};
use crate::metrics::{HealthState, Metrics, Outcome};
use crate::types::{
    CanonicalResponse, CreateModelRequest, EmbedRequest, InferenceRequest, ModelDetails,
    ModelInfo, Operation, OperationStatus,
};
use backoff::{BackoffPolicy, RetryConfig};
use futures::future::join_all;
use health::HealthMonitor;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
pub use strategy::SelectionStrategy;

/// Status of one endpoint, read from cached client state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointStatus {
    pub name: String,
    pub url: String,
    pub backend_type: BackendType,
    pub healthy: bool,
    pub priority: u32,
    pub running_models: usize,
    pub load_score: usize,
    pub retry_count: u32,
    /// Milliseconds since the UNIX epoch, `None` before the first probe
    pub last_health_check_at: Option<u64>,
    pub version: Option<String>,
    pub current_model: Option<String>,
    pub active_requests: usize,
    pub average_response_time_ms: f64,
}

/// Pool-wide status report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub total_endpoints: usize,
    /// Endpoints currently eligible for selection
    pub healthy_endpoints: usize,
    pub strategy: SelectionStrategy,
    pub endpoints: Vec<EndpointStatus>,
}

/// Load-balancing, failover pool over heterogeneous backends
#[derive(Debug)]
pub struct Pool {
    clients: Vec<SharedClient>,
    strategy: SelectionStrategy,
    cursor: AtomicUsize,
    health_check_interval: Duration,
    retry: RetryConfig,
    backoff: BackoffPolicy,
    metrics: Arc<Metrics>,
    clock: SharedClock,
    monitor: Mutex<Option<HealthMonitor>>,
}

impl Pool {
    /// Build a pool from configuration using the system clock
    ///
    /// # Errors
    ///
    /// Returns the first client construction failure, e.g. an `openai`
    /// endpoint without an API key.
    pub fn new(config: &Config, metrics: Arc<Metrics>) -> Result<Self, BackendError> {
        Self::with_clock(config, metrics, system_clock())
    }

    pub fn with_clock(
        config: &Config,
        metrics: Arc<Metrics>,
        clock: SharedClock,
    ) -> Result<Self, BackendError> {
        let clients = config
            .enabled_endpoints()
            .map(|endpoint| create_client(endpoint, &config.timeouts, Arc::clone(&clock)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_clients(clients, &config.pool, metrics, clock))
    }

    /// Build a pool from already constructed clients
    ///
    /// Clients of disabled endpoints are dropped; the rest are stably sorted
    /// by ascending priority.
    pub fn from_clients(
        mut clients: Vec<SharedClient>,
        config: &PoolConfig,
        metrics: Arc<Metrics>,
        clock: SharedClock,
    ) -> Self {
        clients.retain(|c| c.endpoint().enabled());
        clients.sort_by_key(|c| c.priority());

        tracing::info!(
            endpoints = clients.len(),
            strategy = %config.strategy,
            backoff = config.backoff.as_str(),
            health_check_interval_ms = config.health_check_interval_ms,
            retry_delay_ms = config.retry_delay_ms,
            "Endpoint pool initialized"
        );

        Self {
            clients,
            strategy: config.strategy,
            cursor: AtomicUsize::new(0),
            health_check_interval: config.health_check_interval(),
            retry: RetryConfig::new(config.retry_delay()),
            backoff: config.backoff.policy(),
            metrics,
            clock,
            monitor: Mutex::new(None),
        }
    }

    /// Start the periodic health monitor if it is not already running
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_health_monitor(&self) {
        let mut monitor = self.monitor.lock().unwrap_or_else(PoisonError::into_inner);
        if monitor.as_ref().is_some_and(HealthMonitor::is_running) {
            return;
        }
        *monitor = Some(HealthMonitor::spawn(
            self.clients.clone(),
            self.health_check_interval,
            Arc::clone(&self.metrics),
        ));
    }

    /// Stop the periodic health monitor
    ///
    /// Clients keep their last known state and lazy health checks continue
    /// to work.
    pub async fn shutdown(&self) {
        let monitor = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(monitor) = monitor {
            monitor.shutdown().await;
            tracing::info!("Endpoint pool shut down");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(HealthMonitor::is_running)
    }

    /// All clients in priority order
    pub fn clients(&self) -> &[SharedClient] {
        &self.clients
    }

    /// Client bound to `url`, ignoring a trailing slash
    pub fn client(&self, url: &str) -> Option<SharedClient> {
        let wanted = url.trim_end_matches('/');
        self.clients
            .iter()
            .find(|c| c.url().trim_end_matches('/') == wanted)
            .cloned()
    }

    pub fn strategy(&self) -> SelectionStrategy {
        self.strategy
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Eligible clients in priority order
    pub fn healthy_clients(&self) -> Vec<SharedClient> {
        self.clients
            .iter()
            .filter(|c| c.is_eligible())
            .cloned()
            .collect()
    }

    /// Refresh resident models on every eligible client, then apply the strategy
    ///
    /// # Errors
    ///
    /// [`PoolError::NoHealthyBackends`] when no client is eligible.
    pub async fn select_best_client(&self) -> Result<SharedClient, PoolError> {
        let eligible = self.healthy_clients();
        if eligible.is_empty() {
            tracing::warn!(
                total_endpoints = self.clients.len(),
                "No healthy endpoints available"
            );
            return Err(PoolError::NoHealthyBackends);
        }

        self.refresh_running_models(&eligible).await;

        let selected = strategy::select(self.strategy, &eligible, &self.cursor)
            .cloned()
            .ok_or(PoolError::NoHealthyBackends)?;
        tracing::debug!(
            endpoint = %selected.name(),
            strategy = %self.strategy,
            priority = selected.priority(),
            load_score = selected.load_score(),
            "Selected primary endpoint"
        );
        Ok(selected)
    }

    async fn refresh_running_models(&self, clients: &[SharedClient]) {
        join_all(clients.iter().map(|client| async move {
            if let Err(e) = client.refresh_running_models().await {
                tracing::debug!(
                    endpoint = %client.name(),
                    error = %e,
                    "Running model refresh failed, keeping cached list"
                );
            }
        }))
        .await;
    }

    pub async fn generate(
        &self,
        request: &InferenceRequest,
    ) -> Result<CanonicalResponse, PoolError> {
        self.execute(Operation::Generate, move |client| async move {
            client.generate(request).await
        })
        .await
    }

    pub async fn chat(&self, request: &InferenceRequest) -> Result<CanonicalResponse, PoolError> {
        self.execute(Operation::Chat, move |client| async move {
            client.chat(request).await
        })
        .await
    }

    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, PoolError> {
        self.execute(Operation::ListModels, |client| async move {
            client.list_models().await
        })
        .await
    }

    pub async fn list_running_models(&self) -> Result<Vec<String>, PoolError> {
        self.execute(Operation::ListRunningModels, |client| async move {
            client.refresh_running_models().await
        })
        .await
    }

    pub async fn show_model(&self, model: &str) -> Result<ModelDetails, PoolError> {
        self.execute(Operation::ShowModel, move |client| async move {
            client.show_model(model).await
        })
        .await
    }

    pub async fn pull_model(&self, model: &str) -> Result<OperationStatus, PoolError> {
        self.execute(Operation::PullModel, move |client| async move {
            client.pull_model(model).await
        })
        .await
    }

    pub async fn delete_model(&self, model: &str) -> Result<(), PoolError> {
        self.execute(Operation::DeleteModel, move |client| async move {
            client.delete_model(model).await
        })
        .await
    }

    pub async fn create_model(
        &self,
        request: &CreateModelRequest,
    ) -> Result<OperationStatus, PoolError> {
        self.execute(Operation::CreateModel, move |client| async move {
            client.create_model(request).await
        })
        .await
    }

    pub async fn copy_model(&self, source: &str, destination: &str) -> Result<(), PoolError> {
        self.execute(Operation::CopyModel, move |client| async move {
            client.copy_model(source, destination).await
        })
        .await
    }

    pub async fn embed(&self, request: &EmbedRequest) -> Result<Vec<Vec<f32>>, PoolError> {
        self.execute(Operation::Embed, move |client| async move {
            client.embed(request).await
        })
        .await
    }

    /// Snapshot of every endpoint from cached state; performs no I/O
    pub fn pool_status(&self) -> PoolStatus {
        let endpoints: Vec<EndpointStatus> = self
            .clients
            .iter()
            .map(|client| {
                let snapshot = client.state().snapshot();
                EndpointStatus {
                    name: client.name().to_string(),
                    url: client.url().to_string(),
                    backend_type: client.backend_type(),
                    healthy: snapshot.healthy,
                    priority: client.priority(),
                    running_models: snapshot.running_models.len(),
                    load_score: 2 * snapshot.active_requests + snapshot.running_models.len(),
                    retry_count: snapshot.retry_count,
                    last_health_check_at: snapshot.last_check_at.map(unix_millis),
                    version: snapshot.version,
                    current_model: snapshot.current_model,
                    active_requests: snapshot.active_requests,
                    average_response_time_ms: client.processing_status().average_response_time_ms,
                }
            })
            .collect();

        PoolStatus {
            total_endpoints: self.clients.len(),
            healthy_endpoints: self.clients.iter().filter(|c| c.is_eligible()).count(),
            strategy: self.strategy,
            endpoints,
        }
    }

    /// Run one pool operation and record its outcome and latency
    async fn execute<T, F, Fut>(&self, operation: Operation, call: F) -> Result<T, PoolError>
    where
        F: Fn(SharedClient) -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let started = self.clock.now();
        let result = self.execute_with_fallback(operation, call).await;
        let elapsed_ms = self.clock.now().duration_since(started).as_secs_f64() * 1000.0;

        if let Err(e) =
            self.metrics
                .record_request(operation, Outcome::from_success(result.is_ok()), elapsed_ms)
        {
            tracing::error!(
                operation = %operation,
                error = %e,
                "Metrics recording failed. Observability degraded but request continues."
            );
        }
        result
    }

    async fn execute_with_fallback<T, F, Fut>(
        &self,
        operation: Operation,
        call: F,
    ) -> Result<T, PoolError>
    where
        F: Fn(SharedClient) -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let primary = self.select_best_client().await?;
        let sweep: Vec<SharedClient> = std::iter::once(Arc::clone(&primary))
            .chain(
                self.healthy_clients()
                    .into_iter()
                    .filter(|c| c.url() != primary.url()),
            )
            .collect();

        let mut attempts = 0usize;
        let mut last_error: Option<BackendError> = None;

        for client in sweep {
            if !health::check_health(&client, self.health_check_interval, Some(&self.metrics))
                .await
            {
                tracing::debug!(
                    endpoint = %client.name(),
                    operation = %operation,
                    "Skipping endpoint that failed its health check"
                );
                continue;
            }

            if attempts > 0 {
                let delay = (self.backoff)(attempts, &self.retry);
                tracing::info!(
                    endpoint = %client.name(),
                    operation = %operation,
                    attempt = attempts + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Trying next endpoint"
                );
                tokio::time::sleep(delay).await;
                self.metrics.fallback_attempt(operation);
            }
            attempts += 1;

            tracing::debug!(
                endpoint = %client.name(),
                url = %client.url(),
                operation = %operation,
                attempt = attempts,
                "Calling endpoint"
            );

            match call(Arc::clone(&client)).await {
                Ok(value) => {
                    client.state().record_success();
                    self.metrics.backend_attempt(client.name(), Outcome::Success);
                    tracing::info!(
                        endpoint = %client.name(),
                        operation = %operation,
                        attempt = attempts,
                        "Endpoint call succeeded"
                    );
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => {
                    self.metrics.backend_attempt(client.name(), Outcome::Failure);
                    tracing::warn!(
                        endpoint = %client.name(),
                        operation = %operation,
                        error = %e,
                        "Endpoint call failed with a non-retryable error"
                    );
                    return Err(PoolError::from_terminal(e));
                }
                Err(e) => {
                    self.metrics.backend_attempt(client.name(), Outcome::Failure);
                    tracing::warn!(
                        endpoint = %client.name(),
                        operation = %operation,
                        attempt = attempts,
                        error = %e,
                        "Endpoint call failed"
                    );
                    if client.state().record_failure() {
                        self.metrics
                            .health_transition(client.name(), HealthState::Unhealthy);
                    }
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => {
                tracing::error!(
                    operation = %operation,
                    attempts,
                    error = %e,
                    "All endpoints failed"
                );
                Err(PoolError::AllBackendsFailed {
                    attempts,
                    last_error: e.to_string(),
                })
            }
            None => {
                tracing::warn!(
                    operation = %operation,
                    "Every candidate endpoint failed its health check"
                );
                Err(PoolError::NoHealthyBackends)
            }
        }
    }
}
