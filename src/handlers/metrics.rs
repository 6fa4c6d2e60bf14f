//! Prometheus metrics endpoint

use axum::{extract::State, http::StatusCode};

use crate::handlers::AppState;

/// GET /metrics in Prometheus text format
///
/// # Response
///
/// - `200 OK` with the encoded registry
/// - `500 Internal Server Error` if encoding fails
pub async fn handler(State(state): State<AppState>) -> (StatusCode, String) {
    match state.metrics().gather() {
        Ok(output) => (StatusCode::OK, output),
        Err(e) => {
            tracing::error!(error = %e, "Failed to gather metrics for Prometheus scraping");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to gather metrics: {}", e),
            )
        }
    }
}
