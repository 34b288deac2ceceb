//! FORGE Core - Shared Types, Errors, and Configuration
//!
//! This crate defines the value types that flow through the FORGE generation
//! pipeline, the error taxonomy used by every other crate, and the layered
//! configuration loader.
//!
//! # Key Types
//!
//! - `Intent`: the raw user request plus generation options
//! - `Score` / `Grade`: the four-axis quality rubric result
//! - `Generation`: one provider round-trip with token/cost estimates
//! - `HistoryEntry` / `GrimoireEntry` / `TelemetryRecord`: persisted records
//! - `ForgeError` / `ForgeResult`: the master error type and result alias
//! - `ForgeConfig`: layered configuration (runtime > env > rc files > defaults)

pub mod config;
pub mod error;
pub mod ident;
pub mod types;

pub use config::{
    ForgeConfig, GenerationConfig, PathsConfig, RateLimitConfig, SecurityConfig, ServerConfig,
};
pub use error::{
    ConfigError, ForgeError, ForgeResult, PipelineError, ProviderError, StoreError,
};
pub use ident::{output_filename, prompt_hash, short_id, slugify};
pub use types::{
    Generation, Grade, GrimoireEntry, HistoryEntry, Intent, IntentOptions, Score, StylePreset,
    TelemetryRecord,
};
