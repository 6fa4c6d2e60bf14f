//! HTTP request handlers for the modelpool API

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::metrics::Metrics;
use crate::middleware::request_id_middleware;
use crate::pool::Pool;
use crate::types::{InferenceRequest, Input};
use axum::{
    Router, middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod chat;
pub mod generate;
pub mod health;
pub mod metrics;
pub mod models;
pub mod status;

/// Application state shared across all handlers
///
/// All fields are Arc'd for cheap cloning across Axum handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    pool: Arc<Pool>,
}

impl AppState {
    /// Build the pool described by `config`
    ///
    /// # Errors
    ///
    /// Returns an error if metrics registration or client construction fails.
    pub fn new(config: Arc<Config>) -> AppResult<Self> {
        let metrics = Metrics::new()
            .map_err(|e| AppError::Internal(format!("Failed to register metrics: {}", e)))?;
        let pool = Pool::new(&config, Arc::new(metrics))
            .map_err(|e| AppError::Config(format!("Failed to create backend client: {}", e)))?;
        Ok(Self::from_parts(config, Arc::new(pool)))
    }

    pub fn from_parts(config: Arc<Config>, pool: Arc<Pool>) -> Self {
        Self { config, pool }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn shared_pool(&self) -> Arc<Pool> {
        Arc::clone(&self.pool)
    }

    pub fn metrics(&self) -> &Metrics {
        self.pool.metrics()
    }
}

/// Full HTTP application: routes, request IDs, and request tracing
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::handler))
        .route("/api/generate", post(generate::handler))
        .route("/api/chat", post(chat::handler))
        .route("/api/models", get(models::handler))
        .route("/api/status", get(status::handler))
        .route("/metrics", get(metrics::handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
}

/// Reject requests with nothing to send to a backend
pub(crate) fn validate_input(request: &InferenceRequest) -> AppResult<()> {
    match &request.input {
        Input::Prompt { prompt } if prompt.trim().is_empty() => Err(AppError::Validation(
            "prompt cannot be empty".to_string(),
        )),
        Input::Messages { messages } if messages.is_empty() => Err(AppError::Validation(
            "messages cannot be empty".to_string(),
        )),
        Input::Messages { messages } if messages.iter().all(|m| m.content.trim().is_empty()) => {
            Err(AppError::Validation(
                "messages must contain some content".to_string(),
            ))
        }
        _ => Ok(()),
    }
}
