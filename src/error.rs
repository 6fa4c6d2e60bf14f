//! Error types for modelpool
//!
//! Three layers:
//! - [`BackendError`]: one failed call against one backend
//! - [`PoolError`]: what a caller of the pool sees after failover
//! - [`AppError`]: configuration and HTTP surface, implements `IntoResponse`

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Reply could not be mapped into the canonical chat response
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("Backend returned a null response")]
    NullResponse,

    #[error("Backend response has no recognizable content field")]
    InvalidResponseShape,
}

/// Failure of a single call against a single backend
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Transport error calling {endpoint}: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("Request to {endpoint} timed out after {timeout_seconds} seconds")]
    Timeout {
        endpoint: String,
        timeout_seconds: u64,
    },

    #[error("{endpoint} returned HTTP {status}: {message}")]
    Status {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("Failed to decode response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },

    #[error("Endpoint {endpoint} requires an API key")]
    MissingApiKey { endpoint: String },

    #[error("{operation} is not supported by {backend} backends")]
    NotSupported {
        operation: &'static str,
        backend: &'static str,
    },

    #[error("No model is currently loaded on {endpoint}")]
    NoModelLoaded { endpoint: String },

    #[error(transparent)]
    Normalize(#[from] NormalizeError),
}

impl BackendError {
    /// Whether the pool should count this failure and move to the next backend
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Timeout { .. } | Self::Status { .. } | Self::Decode { .. }
        )
    }
}

/// Caller-facing failure of a pool operation
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("No healthy endpoints available")]
    NoHealthyBackends,

    #[error("All {attempts} endpoints failed. Last error: {last_error}")]
    AllBackendsFailed { attempts: usize, last_error: String },

    #[error("{operation} is not supported by {backend} backends")]
    NotSupportedByBackend {
        operation: &'static str,
        backend: &'static str,
    },

    #[error("No model is currently loaded on {endpoint}")]
    NoModelLoaded { endpoint: String },

    #[error("Invalid backend response: {0}")]
    InvalidResponse(#[from] NormalizeError),
}

impl PoolError {
    /// Map a non-retryable backend failure to the error surfaced to callers
    ///
    /// Retryable failures never reach callers directly; they are folded into
    /// [`PoolError::AllBackendsFailed`] by the failover loop.
    pub fn from_terminal(err: BackendError) -> Self {
        match err {
            BackendError::NotSupported { operation, backend } => {
                Self::NotSupportedByBackend { operation, backend }
            }
            BackendError::NoModelLoaded { endpoint } => Self::NoModelLoaded { endpoint },
            BackendError::Normalize(e) => Self::InvalidResponse(e),
            other => Self::AllBackendsFailed {
                attempts: 1,
                last_error: other.to_string(),
            },
        }
    }
}

/// Application-level error for configuration and the HTTP surface
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read config file {path}: {source}")]
    ConfigFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ConfigParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration in {path}: {reason}")]
    ConfigValidationFailed { path: String, reason: String },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Pool(PoolError::NotSupportedByBackend { .. }) => StatusCode::NOT_IMPLEMENTED,
            Self::Pool(PoolError::NoHealthyBackends | PoolError::NoModelLoaded { .. }) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Pool(PoolError::AllBackendsFailed { .. } | PoolError::InvalidResponse(_)) => {
                StatusCode::BAD_GATEWAY
            }
            Self::Config(_)
            | Self::ConfigFileRead { .. }
            | Self::ConfigParseFailed { .. }
            | Self::ConfigValidationFailed { .. }
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = match &self {
            Self::Validation(msg) | Self::Config(msg) | Self::Internal(msg) => msg.clone(),
            other => other.to_string(),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

/// Convenience type alias for Results
pub type AppResult<T> = Result<T, AppError>;
