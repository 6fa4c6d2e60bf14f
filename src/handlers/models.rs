//! Model catalog endpoint

use axum::{Json, extract::State};
use serde::Serialize;

use crate::error::AppResult;
use crate::handlers::AppState;
use crate::types::ModelInfo;

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelInfo>,
}

/// GET /api/models
///
/// Lists the catalog of the first endpoint that answers; catalogs are not
/// merged across endpoints.
pub async fn handler(State(state): State<AppState>) -> AppResult<Json<ModelsResponse>> {
    let models = state.pool().list_models().await?;
    tracing::debug!(count = models.len(), "Listed models");
    Ok(Json(ModelsResponse { models }))
}
