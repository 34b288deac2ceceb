//! FORGE LLM - Provider Router
//!
//! One contract over heterogeneous LLM backends: callers hand the router an
//! enhanced prompt plus options and get back a validated HTML document with
//! request metadata. The router:
//!
//! - resolves model aliases to providers and concrete model names
//! - shapes the provider-specific request body and extracts the response
//! - consumes provider streams (SSE or NDJSON) into a [`ChunkSink`]
//! - post-processes output (fence stripping, HTML-shape validation)
//! - never retries and never switches providers silently; fallback policy
//!   belongs to higher layers

pub mod post;
pub mod providers;
pub mod stream;

use async_trait::async_trait;
use forge_core::{ForgeResult, ProviderError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub use post::{ensure_html, estimate_cost, estimate_tokens, strip_code_fences};
pub use providers::{
    detect_provider, resolve_model, AnthropicProvider, GeminiProvider, OllamaProvider,
    OpenAiProvider, ProviderKind, DEFAULT_PROVIDER,
};

/// Default request timeout for remote HTTP providers.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Request timeout for local Ollama, which can be slow to first token.
pub const OLLAMA_TIMEOUT: Duration = Duration::from_secs(300);

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

/// One generation request as seen by the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// The enhanced user prompt.
    pub prompt: String,
    /// Provider-agnostic system instruction.
    pub system: String,
    /// Model alias or full model name; resolution is total.
    pub model_alias: String,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Stream chunks through the supplied sink as they arrive.
    pub stream: bool,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>, model_alias: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: String::new(),
            model_alias: model_alias.into(),
            max_tokens: 8192,
            temperature: 0.8,
            stream: false,
        }
    }
}

/// Metadata for one completed generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateMeta {
    pub provider: String,
    pub resolved_model: String,
    pub duration_ms: u64,
    pub tokens_in_est: u64,
    pub tokens_out_est: u64,
}

/// A routable model as reported by `/api/models`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub alias: String,
    pub model: String,
    pub provider: ProviderKind,
    /// Whether the owning provider has credentials (or is local).
    pub configured: bool,
}

// ============================================================================
// CHUNK SINK
// ============================================================================

/// Receives streamed output chunks. Implementations must be cheap and must
/// not block: sends happen on the request task.
pub trait ChunkSink: Send + Sync {
    fn send(&self, chunk: &str);
}

/// ChunkSink over an unbounded tokio channel.
pub struct ChannelSink {
    tx: tokio::sync::mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ChunkSink for ChannelSink {
    fn send(&self, chunk: &str) {
        // A dropped receiver just means nobody is watching the stream.
        let _ = self.tx.send(chunk.to_string());
    }
}

// ============================================================================
// PROVIDER TRAIT
// ============================================================================

/// One LLM backend. Implementations shape their own request bodies, extract
/// their own response fields, and push stream chunks into the sink.
#[async_trait]
pub trait HtmlProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Whether the provider can be called (credentials present; local
    /// providers are always available).
    fn is_available(&self) -> bool;

    /// Run one generation against the resolved model and return the raw
    /// text. Post-processing happens in the router.
    async fn generate_raw(
        &self,
        model: &str,
        request: &GenerateRequest,
        sink: Option<&dyn ChunkSink>,
    ) -> ForgeResult<String>;
}

// ============================================================================
// ROUTER
// ============================================================================

/// Uniform facade over the configured providers.
pub struct Router {
    providers: HashMap<ProviderKind, Arc<dyn HtmlProvider>>,
}

impl Router {
    /// Build a router with every backend, reading credentials from the
    /// process environment. Missing tokens leave the provider registered
    /// but unavailable; they never abort startup.
    pub fn from_env() -> Self {
        let remote = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_default();
        let local = reqwest::Client::builder()
            .timeout(OLLAMA_TIMEOUT)
            .build()
            .unwrap_or_default();

        let mut providers: HashMap<ProviderKind, Arc<dyn HtmlProvider>> = HashMap::new();
        providers.insert(
            ProviderKind::Gemini,
            Arc::new(GeminiProvider::from_env(remote.clone())),
        );
        providers.insert(
            ProviderKind::OpenAiCompatible,
            Arc::new(OpenAiProvider::from_env(remote.clone())),
        );
        providers.insert(
            ProviderKind::Anthropic,
            Arc::new(AnthropicProvider::from_env(remote)),
        );
        providers.insert(ProviderKind::Ollama, Arc::new(OllamaProvider::from_env(local)));
        Self { providers }
    }

    /// An empty router for tests; add providers with [`Router::with_provider`].
    pub fn empty() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Register or replace the provider for its kind.
    pub fn with_provider(mut self, provider: Arc<dyn HtmlProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    /// Whether at least one provider can take requests.
    pub fn any_available(&self) -> bool {
        self.providers.values().any(|p| p.is_available())
    }

    /// Known aliases and their configuration state.
    pub fn models(&self) -> Vec<ModelInfo> {
        providers::known_aliases()
            .iter()
            .map(|(alias, kind, model)| ModelInfo {
                alias: alias.to_string(),
                model: model.to_string(),
                provider: *kind,
                configured: self
                    .providers
                    .get(kind)
                    .map(|p| p.is_available())
                    .unwrap_or(false),
            })
            .collect()
    }

    /// Run one generation. Output is fence-stripped, trimmed, and must be
    /// an HTML document. The first error is returned verbatim; there is no
    /// in-router retry.
    pub async fn generate(
        &self,
        request: &GenerateRequest,
        sink: Option<&dyn ChunkSink>,
        cancel: &CancellationToken,
    ) -> ForgeResult<(String, GenerateMeta)> {
        let kind = detect_provider(&request.model_alias);
        let provider = self.providers.get(&kind).ok_or_else(|| {
            ProviderError::NotConfigured {
                provider: kind.to_string(),
            }
        })?;
        if !provider.is_available() {
            return Err(ProviderError::NotConfigured {
                provider: kind.to_string(),
            }
            .into());
        }

        let model = resolve_model(&request.model_alias);
        tracing::debug!(provider = %kind, model = %model, stream = request.stream, "Routing generation");

        let start = Instant::now();
        let raw = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled.into()),
            result = provider.generate_raw(&model, request, sink) => result?,
        };

        let html = strip_code_fences(&raw);
        ensure_html(&html)?;

        let meta = GenerateMeta {
            provider: kind.to_string(),
            resolved_model: model,
            duration_ms: start.elapsed().as_millis() as u64,
            tokens_in_est: estimate_tokens(&request.prompt) + estimate_tokens(&request.system),
            tokens_out_est: estimate_tokens(&html),
        };
        Ok((html, meta))
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ============================================================================
// MOCK PROVIDER FOR TESTING
// ============================================================================

/// Scripted provider for tests: pops queued responses in order, then falls
/// back to a default. Counts calls.
pub struct MockHtmlProvider {
    kind: ProviderKind,
    script: std::sync::Mutex<std::collections::VecDeque<ForgeResult<String>>>,
    default_response: Option<String>,
    calls: std::sync::atomic::AtomicU64,
}

impl MockHtmlProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            script: std::sync::Mutex::new(std::collections::VecDeque::new()),
            default_response: None,
            calls: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Always return this response once the script is exhausted.
    pub fn with_default(mut self, html: impl Into<String>) -> Self {
        self.default_response = Some(html.into());
        self
    }

    /// Queue one scripted response.
    pub fn push_response(self, html: impl Into<String>) -> Self {
        self.script
            .lock()
            .expect("mock script lock")
            .push_back(Ok(html.into()));
        self
    }

    /// Queue one scripted failure.
    pub fn push_error(self, error: ProviderError) -> Self {
        self.script
            .lock()
            .expect("mock script lock")
            .push_back(Err(error.into()));
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[async_trait]
impl HtmlProvider for MockHtmlProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn generate_raw(
        &self,
        _model: &str,
        request: &GenerateRequest,
        sink: Option<&dyn ChunkSink>,
    ) -> ForgeResult<String> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let next = self.script.lock().expect("mock script lock").pop_front();
        let result = match next {
            Some(result) => result,
            None => match &self.default_response {
                Some(html) => Ok(html.clone()),
                None => Err(ProviderError::EmptyResponse {
                    provider: self.kind.to_string(),
                }
                .into()),
            },
        };
        if let (Ok(html), Some(sink), true) = (&result, sink, request.stream) {
            // Emit in two chunks so streaming consumers see aggregation.
            let mid = html.len() / 2;
            sink.send(&html[..mid]);
            sink.send(&html[mid..]);
        }
        result
    }
}
