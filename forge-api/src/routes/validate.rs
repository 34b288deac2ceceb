//! Standalone rubric validation

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::{extract::State, Json};
use forge_core::Score;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ValidateBody {
    pub html: String,
}

/// POST /api/validate
pub async fn validate(
    State(state): State<AppState>,
    Json(body): Json<ValidateBody>,
) -> ApiResult<Json<Score>> {
    if body.html.trim().is_empty() {
        return Err(ApiError::invalid_input("html is empty"));
    }
    Ok(Json(state.validator.validate(&body.html)))
}
