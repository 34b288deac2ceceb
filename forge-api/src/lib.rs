//! FORGE API - HTTP/SSE Surface
//!
//! REST endpoints over the pipeline, validator, grimoire, and history, plus
//! the SSE progress channel. Cross-cutting layers: CORS, a sliding-window
//! per-IP rate limiter, and optional bearer-token auth (health and progress
//! stay open).

pub mod error;
pub mod middleware;
pub mod routes;
pub mod sse;
pub mod state;

pub use error::{ApiError, ApiResult, ErrorCode};
pub use middleware::{
    auth_middleware, cors_middleware, rate_limit_middleware, AuthState, RateLimitState,
};
pub use routes::create_api_router;
pub use sse::{ProgressEmitter, SseChannel, SseChannelOptions, SseMessage};
pub use state::AppState;
