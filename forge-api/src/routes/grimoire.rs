//! Grimoire endpoints

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use forge_core::GrimoireEntry;
use forge_store::GrimoireQuery;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub q: Option<String>,
    pub tag: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub favorite: bool,
    pub limit: Option<usize>,
}

/// GET /api/grimoire
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<GrimoireEntry>>> {
    let entries = state
        .grimoire
        .search(&GrimoireQuery {
            q: query.q,
            tag: query.tag,
            category: query.category,
            favorite_only: query.favorite,
            limit: query.limit,
        })
        .await
        .map_err(ApiError::from)?;
    Ok(Json(entries))
}

#[derive(Debug, Deserialize)]
pub struct SaveBody {
    pub prompt: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_category")]
    pub category: String,
}

fn default_category() -> String {
    "general".to_string()
}

/// POST /api/grimoire
pub async fn save(
    State(state): State<AppState>,
    Json(body): Json<SaveBody>,
) -> ApiResult<(StatusCode, Json<GrimoireEntry>)> {
    if body.prompt.trim().is_empty() {
        return Err(ApiError::invalid_input("prompt is empty"));
    }
    let entry = state
        .grimoire
        .inscribe(body.prompt, body.tags, body.category, Default::default())
        .await
        .map_err(ApiError::from)?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// GET /api/grimoire/:id
pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<GrimoireEntry>> {
    state
        .grimoire
        .get(&id)
        .await
        .map_err(ApiError::from)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("grimoire entry {}", id)))
}
