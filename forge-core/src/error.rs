//! Error types for FORGE operations

use thiserror::Error;

/// Persistence layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Key not found: {key} in collection {collection}")]
    NotFound { collection: String, key: String },

    #[error("Entry not found: {id}")]
    EntryNotFound { id: String },

    #[error("Read failed for {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    #[error("Write failed for {path}: {reason}")]
    WriteFailed { path: String, reason: String },

    #[error("Serialization failed: {reason}")]
    SerializeFailed { reason: String },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// LLM provider errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Provider {provider} is not configured (missing token)")]
    NotConfigured { provider: String },

    #[error("Request to {provider} failed with status {status}: {message}")]
    RequestFailed {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Provider {provider} returned no usable text")]
    EmptyResponse { provider: String },

    #[error("Provider output is not an HTML document: {reason}")]
    MalformedOutput { reason: String },

    #[error("Stream from {provider} failed mid-response: {message}")]
    StreamError { provider: String, message: String },

    #[error("Request to {provider} timed out after {after_ms}ms")]
    Timeout { provider: String, after_ms: u64 },

    #[error("Generation cancelled")]
    Cancelled,

    #[error("All providers failed: {attempted:?}")]
    AllProvidersFailed { attempted: Vec<String> },
}

/// Pipeline orchestration errors. Carries the stage name so callers can
/// render a single-line `[stage] message` prefix.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("[{stage}] {message}")]
    StageFailed { stage: String, message: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse {path}: {reason}")]
    ParseFailed { path: String, reason: String },
}

/// Master error type for all FORGE errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ForgeError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl ForgeError {
    /// Shorthand for an `InvalidInput` pipeline error.
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        ForgeError::Pipeline(PipelineError::InvalidInput {
            reason: reason.into(),
        })
    }

    /// Shorthand for a stage-tagged pipeline error.
    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        ForgeError::Pipeline(PipelineError::StageFailed {
            stage: stage.into(),
            message: message.into(),
        })
    }

    /// True if this error represents a cancelled operation. Per-request
    /// timeouts act as an implicit cancel, so provider timeouts match too.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            ForgeError::Provider(ProviderError::Cancelled)
                | ForgeError::Provider(ProviderError::Timeout { .. })
        )
    }
}

/// Result type alias for FORGE operations.
pub type ForgeResult<T> = Result<T, ForgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_error_renders_prefix() {
        let err = ForgeError::stage("generate", "provider timeout");
        assert_eq!(err.to_string(), "Pipeline error: [generate] provider timeout");
    }

    #[test]
    fn test_provider_error_conversion() {
        let err: ForgeError = ProviderError::EmptyResponse {
            provider: "gemini".to_string(),
        }
        .into();
        assert!(matches!(
            err,
            ForgeError::Provider(ProviderError::EmptyResponse { .. })
        ));
    }

    #[test]
    fn test_is_cancelled() {
        let err: ForgeError = ProviderError::Cancelled.into();
        assert!(err.is_cancelled());
        assert!(!ForgeError::invalid_input("x").is_cancelled());
    }

    #[test]
    fn test_timeout_is_implicit_cancel() {
        let err: ForgeError = ProviderError::Timeout {
            provider: "gemini".to_string(),
            after_ms: 120_000,
        }
        .into();
        assert!(err.is_cancelled());
    }
}
