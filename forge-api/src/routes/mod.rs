//! Route modules and router assembly
//!
//! Layer order (outermost first): CORS → rate limit → auth → counter →
//! routes. Health and progress skip auth; nothing skips the rate limiter.

pub mod generate;
pub mod grimoire;
pub mod health;
pub mod history;
pub mod models;
pub mod validate;

use crate::error::ApiError;
use crate::middleware::{
    auth_middleware, cors_middleware, rate_limit_middleware, AuthState, RateLimitState,
};
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::middleware::{from_fn, from_fn_with_state, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;

/// Assemble the full API router.
pub fn create_api_router(
    state: AppState,
    auth: AuthState,
    rate_limit: RateLimitState,
) -> Router {
    Router::new()
        .route("/api/health", get(health::health))
        .route("/api/models", get(models::models))
        .route("/api/generate", post(generate::generate))
        .route("/api/validate", post(validate::validate))
        .route(
            "/api/grimoire",
            get(grimoire::list).post(grimoire::save),
        )
        .route("/api/grimoire/:id", get(grimoire::get_by_id))
        .route("/api/history", get(history::list))
        .route("/api/history/:id", get(history::get_by_id))
        .route("/api/progress", get(progress))
        .fallback(fallback)
        .layer(from_fn_with_state(state.clone(), count_middleware))
        .layer(from_fn_with_state(auth, auth_middleware))
        .layer(from_fn_with_state(rate_limit, rate_limit_middleware))
        .layer(from_fn(cors_middleware))
        .with_state(state)
}

/// SSE channel for pipeline progress events.
async fn progress(
    State(state): State<AppState>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    state.progress.handler()
}

async fn fallback() -> ApiError {
    ApiError::not_found("route")
}

async fn count_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    state.count_request();
    next.run(request).await
}
