//! Health check endpoint
//!
//! Provides a simple health check for monitoring and load balancers.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::handlers::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Endpoints currently eligible for selection
    pub healthy_endpoints: usize,
    /// "operational", or "degraded" once the background monitor has died
    pub health_monitor: &'static str,
}

/// Always 200 while the process can serve HTTP
///
/// Reads cached endpoint state only; no backend is contacted.
pub async fn handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let health_monitor = if state.metrics().background_task_failures_count() > 0 {
        "degraded"
    } else {
        "operational"
    };

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "OK",
            healthy_endpoints: state.pool().healthy_clients().len(),
            health_monitor,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::BackendClient;
    use crate::config::Config;
    use std::str::FromStr;
    use std::sync::Arc;

    fn create_test_state() -> AppState {
        let config = Config::from_str(
            r#"
[[endpoints]]
url = "http://127.0.0.1:1"
backend_type = "ollama"

[[endpoints]]
url = "http://127.0.0.1:2"
backend_type = "rkllama"
"#,
        )
        .expect("should parse test config");
        AppState::new(Arc::new(config)).expect("should build state")
    }

    #[tokio::test]
    async fn test_health_handler_returns_ok() {
        let state = create_test_state();
        let (status, Json(body)) = handler(State(state)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "OK");
        assert_eq!(body.healthy_endpoints, 2);
        assert_eq!(body.health_monitor, "operational");
    }

    #[tokio::test]
    async fn test_health_handler_reports_degraded_monitor() {
        let state = create_test_state();
        state.metrics().background_task_failure();

        let (status, Json(body)) = handler(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.health_monitor, "degraded");
    }

    #[tokio::test]
    async fn test_health_counts_only_eligible_endpoints() {
        let state = create_test_state();
        let first = &state.pool().clients()[0];
        for _ in 0..first.endpoint().max_retries() {
            first.state().record_failure();
        }

        let (_, Json(body)) = handler(State(state.clone())).await;
        assert_eq!(body.healthy_endpoints, 1);
    }
}
