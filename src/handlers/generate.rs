//! Single-turn generation endpoint
//!
//! Accepts a prompt (or a conversation, flattened to `role: content` lines by
//! the backend) and returns the first successful reply across the pool.

use axum::{Extension, Json, extract::State};

use crate::error::AppResult;
use crate::handlers::{AppState, validate_input};
use crate::middleware::RequestId;
use crate::types::{CanonicalResponse, InferenceRequest};

/// POST /api/generate
pub async fn handler(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(request): Json<InferenceRequest>,
) -> AppResult<Json<CanonicalResponse>> {
    validate_input(&request)?;

    tracing::info!(
        request_id = %request_id,
        model = request.model.as_deref().unwrap_or("default"),
        "Generate request received"
    );

    let response = state.pool().generate(&request).await?;

    tracing::info!(
        request_id = %request_id,
        model = %response.model,
        response_length = response.content().len(),
        "Generate request completed"
    );

    Ok(Json(response))
}
