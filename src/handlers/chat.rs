//! Multi-turn chat endpoint

use axum::{Extension, Json, extract::State};

use crate::error::AppResult;
use crate::handlers::{AppState, validate_input};
use crate::middleware::RequestId;
use crate::types::{CanonicalResponse, InferenceRequest};

/// POST /api/chat
///
/// A bare `prompt` is accepted and sent as a single user message.
pub async fn handler(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(request): Json<InferenceRequest>,
) -> AppResult<Json<CanonicalResponse>> {
    validate_input(&request)?;

    tracing::info!(
        request_id = %request_id,
        model = request.model.as_deref().unwrap_or("default"),
        messages = request.input.to_messages().len(),
        "Chat request received"
    );

    let response = state.pool().chat(&request).await?;

    tracing::info!(
        request_id = %request_id,
        model = %response.model,
        response_length = response.content().len(),
        "Chat request completed"
    );

    Ok(Json(response))
}
