//! Provider and model listing

use crate::state::AppState;
use axum::{extract::State, Json};
use forge_llm::ModelInfo;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelInfo>,
}

/// GET /api/models
pub async fn models(State(state): State<AppState>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        models: state.router.models(),
    })
}
