//! Layered configuration
//!
//! Precedence, highest first: runtime overrides > `FORGE_*` environment
//! variables > project `.forgerc.json` > user `.forgerc.json` > built-in
//! defaults. Environment variables use dot-path form, e.g.
//! `FORGE_SECURITY_SANITIZE=false` maps to `{security: {sanitize: false}}`.

use crate::error::{ConfigError, ForgeResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "FORGE_";

/// Name of the rc file looked up in the project and user directories.
pub const RC_FILE: &str = ".forgerc.json";

// ============================================================================
// CONFIG SECTIONS
// ============================================================================

/// Sanitizer behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Run the sanitizer over generated HTML before persisting.
    pub sanitize: bool,
    /// Strip `<script>` blocks entirely (off by default: generated apps
    /// need their scripts).
    pub strip_scripts: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            sanitize: true,
            strip_scripts: false,
        }
    }
}

/// Sliding-window rate limit settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 30,
            window_secs: 60,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Optional bearer token. When set, all endpoints except health and
    /// progress require `Authorization: Bearer <token>`.
    pub token: Option<String>,
    pub rate_limit: RateLimitConfig,
    /// SSE client cap per channel.
    pub sse_max_clients: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7433,
            token: None,
            rate_limit: RateLimitConfig::default(),
            sse_max_clients: 64,
        }
    }
}

/// Generation defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub default_model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Quality threshold below which the iteration chain keeps refining.
    pub iterate_threshold: f64,
    pub max_rounds: u32,
    /// Bound on concurrent LLM calls in best-of-N / duels / evolution.
    pub parallelism: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            default_model: "gemini".to_string(),
            max_tokens: 8192,
            temperature: 0.8,
            iterate_threshold: 0.7,
            max_rounds: 3,
            parallelism: 3,
        }
    }
}

/// Filesystem layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// User-local persistence root. Collections, telemetry, grimoire, and
    /// plugin state live underneath.
    pub data_dir: PathBuf,
    /// Where rendered HTML files are written.
    pub output_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            data_dir: home.join(".forge"),
            output_dir: PathBuf::from("."),
        }
    }
}

/// Master configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ForgeConfig {
    pub security: SecurityConfig,
    pub server: ServerConfig,
    pub generation: GenerationConfig,
    pub paths: PathsConfig,
}

impl ForgeConfig {
    /// Load configuration with full precedence. `runtime` is the
    /// highest-priority overlay (CLI flags, test fixtures).
    pub fn load(runtime: Option<Value>) -> ForgeResult<Self> {
        let mut tree = serde_json::to_value(ForgeConfig::default()).map_err(|e| {
            ConfigError::ParseFailed {
                path: "<defaults>".to_string(),
                reason: e.to_string(),
            }
        })?;

        if let Some(home) = dirs::home_dir() {
            merge_rc_file(&mut tree, &home.join(RC_FILE))?;
        }
        merge_rc_file(&mut tree, Path::new(RC_FILE))?;

        apply_env_overlay(&mut tree, std::env::vars().filter(|(k, _)| k.starts_with(ENV_PREFIX)));

        if let Some(overrides) = runtime {
            merge_value(&mut tree, overrides);
        }

        let config: ForgeConfig =
            serde_json::from_value(tree).map_err(|e| ConfigError::ParseFailed {
                path: "<merged>".to_string(),
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate value ranges. Called by `load`; also usable on hand-built
    /// configs in tests.
    pub fn validate(&self) -> ForgeResult<()> {
        if self.server.rate_limit.max_requests == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.rate_limit.max_requests".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        if self.generation.parallelism == 0 {
            return Err(ConfigError::InvalidValue {
                field: "generation.parallelism".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(ConfigError::InvalidValue {
                field: "generation.temperature".to_string(),
                value: self.generation.temperature.to_string(),
                reason: "must be within [0, 2]".to_string(),
            }
            .into());
        }
        if !(0.0..=1.0).contains(&self.generation.iterate_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "generation.iterate_threshold".to_string(),
                value: self.generation.iterate_threshold.to_string(),
                reason: "must be within [0, 1]".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

// ============================================================================
// OVERLAY MECHANICS
// ============================================================================

fn merge_rc_file(tree: &mut Value, path: &Path) -> ForgeResult<()> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        // Absent rc files are the normal case.
        Err(_) => return Ok(()),
    };
    let value: Value = serde_json::from_str(&text).map_err(|e| ConfigError::ParseFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    merge_value(tree, value);
    Ok(())
}

/// Deep-merge `overlay` into `base`. Objects merge recursively; any other
/// value replaces wholesale.
pub fn merge_value(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(slot) => merge_value(slot, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Apply `FORGE_*` variables onto the config tree.
///
/// The suffix after the prefix is split on `_` and matched greedily against
/// existing keys at each level, so `FORGE_SERVER_RATE_LIMIT_MAX_REQUESTS`
/// resolves to `server.rate_limit.max_requests` even though both the section
/// and the field contain underscores. Values parse as JSON when possible,
/// otherwise as strings.
pub fn apply_env_overlay(tree: &mut Value, vars: impl Iterator<Item = (String, String)>) {
    for (key, raw) in vars {
        let Some(suffix) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let segments: Vec<String> = suffix.split('_').map(|s| s.to_ascii_lowercase()).collect();
        if segments.is_empty() {
            continue;
        }
        let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
        if !apply_path(tree, &segments, &value) {
            tracing::warn!(var = %key, "Unrecognized configuration override, ignoring");
        }
    }
}

/// Walk `tree` along `segments`, greedily joining segments to match existing
/// keys. Returns false when no existing path matches.
fn apply_path(node: &mut Value, segments: &[String], value: &Value) -> bool {
    let Value::Object(map) = node else {
        return false;
    };
    // Longest join first, so `rate_limit` beats `rate`.
    for take in (1..=segments.len()).rev() {
        let candidate = segments[..take].join("_");
        if !map.contains_key(&candidate) {
            continue;
        }
        if take == segments.len() {
            map.insert(candidate, value.clone());
            return true;
        }
        if let Some(child) = map.get_mut(&candidate) {
            if apply_path(child, &segments[take..], value) {
                return true;
            }
        }
    }
    false
}
