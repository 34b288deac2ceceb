//! Error types for the FORGE API
//!
//! `ApiError` is the structured error every endpoint returns, serialized as
//! JSON with a status derived from its `ErrorCode`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use forge_core::{ForgeError, PipelineError, ProviderError, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Request lacks a valid bearer token
    Unauthorized,

    /// Request body or parameters are malformed
    InvalidInput,

    /// Route or entity does not exist
    NotFound,

    /// Sliding-window rate limit exceeded
    RateLimited,

    /// A required subsystem is absent (e.g. no generation pipeline)
    NotConfigured,

    /// SSE channel is at its client cap
    ChannelFull,

    /// Upstream LLM provider failed
    ProviderFailed,

    /// Anything else
    Internal,
}

impl ErrorCode {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::NotConfigured => StatusCode::NOT_IMPLEMENTED,
            ErrorCode::ChannelFull => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::ProviderFailed | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Structured error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            error: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    pub fn unauthorized() -> Self {
        Self::new(ErrorCode::Unauthorized, "Invalid or missing bearer token")
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, format!("{} not found", what.into()))
    }

    pub fn not_configured(subsystem: &str) -> Self {
        Self::new(
            ErrorCode::NotConfigured,
            format!("{} is not configured", subsystem),
        )
    }

    pub fn channel_full() -> Self {
        Self::new(ErrorCode::ChannelFull, "Too many connected clients")
    }

    pub fn rate_limited(retry_after_ms: u64) -> Self {
        Self::new(ErrorCode::RateLimited, "Rate limit exceeded")
            .with_details(serde_json::json!({ "retryAfterMs": retry_after_ms }))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.error)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

impl From<ForgeError> for ApiError {
    fn from(error: ForgeError) -> Self {
        match &error {
            ForgeError::Pipeline(PipelineError::InvalidInput { reason }) => {
                ApiError::invalid_input(reason.clone())
            }
            ForgeError::Store(StoreError::NotFound { .. })
            | ForgeError::Store(StoreError::EntryNotFound { .. }) => {
                ApiError::new(ErrorCode::NotFound, error.to_string())
            }
            ForgeError::Provider(ProviderError::NotConfigured { provider }) => {
                ApiError::not_configured(provider)
            }
            ForgeError::Provider(_) => {
                ApiError::new(ErrorCode::ProviderFailed, error.to_string())
            }
            _ => ApiError::internal(error.to_string()),
        }
    }
}

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;
