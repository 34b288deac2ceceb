//! Provider implementations and alias resolution
//!
//! Four backends sit behind the [`HtmlProvider`](crate::HtmlProvider)
//! contract: Gemini, OpenAI-compatible endpoints, Anthropic, and local
//! Ollama. Alias detection is a total function: any string resolves to some
//! provider, unknown aliases fall through to the default and resolve to
//! themselves as model names.

pub mod anthropic;
pub mod gemini;
pub mod ollama;
pub mod openai;

use forge_core::ProviderError;
use serde::{Deserialize, Serialize};

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

/// The provider backends FORGE can route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    Gemini,
    OpenAiCompatible,
    Anthropic,
    Ollama,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::OpenAiCompatible => "openai-compatible",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Ollama => "ollama",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The provider used when no heuristic matches an alias.
pub const DEFAULT_PROVIDER: ProviderKind = ProviderKind::Gemini;

/// Exact alias table: `(alias, provider, resolved model)`.
const ALIASES: &[(&str, ProviderKind, &str)] = &[
    ("gemini", ProviderKind::Gemini, "gemini-2.0-flash"),
    ("flash", ProviderKind::Gemini, "gemini-2.0-flash"),
    ("gemini-pro", ProviderKind::Gemini, "gemini-1.5-pro"),
    ("gpt", ProviderKind::OpenAiCompatible, "gpt-4o-mini"),
    ("gpt-mini", ProviderKind::OpenAiCompatible, "gpt-4o-mini"),
    ("openai", ProviderKind::OpenAiCompatible, "gpt-4o-mini"),
    ("claude", ProviderKind::Anthropic, "claude-sonnet-4-20250514"),
    ("sonnet", ProviderKind::Anthropic, "claude-sonnet-4-20250514"),
    ("haiku", ProviderKind::Anthropic, "claude-3-5-haiku-20241022"),
    ("ollama", ProviderKind::Ollama, "llama3.1"),
    ("llama", ProviderKind::Ollama, "llama3.1"),
];

/// The exact alias table, for model listings.
pub fn known_aliases() -> &'static [(&'static str, ProviderKind, &'static str)] {
    ALIASES
}

/// Map an alias to its provider. Total: unknown aliases fall back to
/// [`DEFAULT_PROVIDER`].
pub fn detect_provider(alias: &str) -> ProviderKind {
    let alias = alias.trim().to_lowercase();
    for (name, kind, _) in ALIASES {
        if *name == alias {
            return *kind;
        }
    }
    // Prefix heuristics over full model names.
    if alias.starts_with("gemini") {
        ProviderKind::Gemini
    } else if alias.starts_with("gpt") || alias.starts_with("o1") || alias.starts_with("o3") {
        ProviderKind::OpenAiCompatible
    } else if alias.starts_with("claude") {
        ProviderKind::Anthropic
    } else if alias.starts_with("llama")
        || alias.starts_with("mistral")
        || alias.starts_with("qwen")
        || alias.contains(':')
    {
        // Ollama tags look like "llama3.1:8b".
        ProviderKind::Ollama
    } else {
        DEFAULT_PROVIDER
    }
}

/// Map an alias to a concrete model name. Unknown aliases resolve to
/// themselves so full model names pass through untouched.
pub fn resolve_model(alias: &str) -> String {
    let needle = alias.trim().to_lowercase();
    for (name, _, model) in ALIASES {
        if *name == needle {
            return model.to_string();
        }
    }
    alias.trim().to_string()
}

// ----------------------------------------------------------------------
// shared error constructors
// ----------------------------------------------------------------------

pub(crate) fn request_failed(
    provider: &str,
    status: u16,
    message: impl Into<String>,
) -> ProviderError {
    ProviderError::RequestFailed {
        provider: provider.to_string(),
        status,
        message: message.into(),
    }
}

pub(crate) fn empty_response(provider: &str) -> ProviderError {
    ProviderError::EmptyResponse {
        provider: provider.to_string(),
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Alias resolution is total: any string detects to some provider
        /// and resolves to a non-empty model (or echoes itself).
        #[test]
        fn prop_alias_resolution_total(alias in "[a-zA-Z0-9:._-]{1,32}") {
            let _ = detect_provider(&alias);
            let resolved = resolve_model(&alias);
            prop_assert_eq!(resolved.is_empty(), alias.trim().is_empty());
        }
    }
}
