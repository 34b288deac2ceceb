//! History endpoints

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use forge_core::{Grade, HistoryEntry};
use forge_store::HistoryFilter;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
    pub provider: Option<String>,
    pub min_grade: Option<String>,
}

/// GET /api/history
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<HistoryEntry>>> {
    let entries = state
        .history
        .list(&HistoryFilter {
            provider: query.provider,
            min_grade: query.min_grade.as_deref().and_then(Grade::parse),
            limit: query.limit,
        })
        .await
        .map_err(ApiError::from)?;
    Ok(Json(entries))
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryDetail {
    #[serde(flatten)]
    pub entry: HistoryEntry,
    pub html: Option<String>,
}

/// GET /api/history/:id
pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<HistoryDetail>> {
    let entry = state
        .history
        .get(&id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found(format!("history entry {}", id)))?;
    let html = state.history.get_code(&id).await.map_err(ApiError::from)?;
    Ok(Json(HistoryDetail { entry, html }))
}
