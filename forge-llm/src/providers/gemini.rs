//! Google Gemini provider
//!
//! Non-streaming calls hit `:generateContent`; streaming uses
//! `:streamGenerateContent?alt=sse` and aggregates candidate text deltas.

use crate::providers::{empty_response, request_failed, ProviderKind};
use crate::stream::{for_each_sse_data, StreamControl};
use crate::{ChunkSink, GenerateRequest, HtmlProvider};
use async_trait::async_trait;
use forge_core::{ForgeResult, ProviderError};
use reqwest::Client;
use serde::{Deserialize, Serialize};

const PROVIDER: &str = "gemini";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Serialize)]
struct Request<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Gemini HTTP provider.
pub struct GeminiProvider {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(client: Client, api_key: Option<String>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            api_key,
            base_url: base_url.into(),
        }
    }

    /// Read credentials from the environment. A missing key leaves the
    /// provider registered but unavailable.
    pub fn from_env(client: Client) -> Self {
        let base_url =
            std::env::var("GEMINI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(client, std::env::var(API_KEY_ENV).ok(), base_url)
    }

    fn key(&self) -> ForgeResult<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| {
                ProviderError::NotConfigured {
                    provider: PROVIDER.to_string(),
                }
                .into()
            })
    }

    fn extract_text(response: &Response) -> Option<String> {
        let parts = &response.candidates.first()?.content.as_ref()?.parts;
        if parts.is_empty() {
            return None;
        }
        Some(parts.iter().map(|p| p.text.as_str()).collect())
    }
}

#[async_trait]
impl HtmlProvider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate_raw(
        &self,
        model: &str,
        request: &GenerateRequest,
        sink: Option<&dyn ChunkSink>,
    ) -> ForgeResult<String> {
        let key = self.key()?;
        let body = Request {
            contents: vec![Content {
                parts: vec![Part {
                    text: &request.prompt,
                }],
            }],
            system_instruction: (!request.system.is_empty()).then(|| Content {
                parts: vec![Part {
                    text: &request.system,
                }],
            }),
            generation_config: GenerationConfig {
                max_output_tokens: request.max_tokens,
                temperature: request.temperature,
            },
        };

        let method = if request.stream {
            "streamGenerateContent?alt=sse&key="
        } else {
            "generateContent?key="
        };
        let url = format!("{}/models/{}:{}{}", self.base_url, model, method, key);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            let message = serde_json::from_str::<ApiError>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(request_failed(PROVIDER, status.as_u16(), message).into());
        }

        if request.stream {
            let mut aggregated = String::new();
            for_each_sse_data(response, PROVIDER, |payload| {
                if let Ok(parsed) = serde_json::from_str::<Response>(payload) {
                    if let Some(text) = Self::extract_text(&parsed) {
                        if let Some(sink) = sink {
                            sink.send(&text);
                        }
                        aggregated.push_str(&text);
                    }
                }
                StreamControl::Continue
            })
            .await?;
            if aggregated.is_empty() {
                return Err(empty_response(PROVIDER).into());
            }
            Ok(aggregated)
        } else {
            let parsed: Response = response.json().await.map_err(|e| {
                ProviderError::RequestFailed {
                    provider: PROVIDER.to_string(),
                    status: status.as_u16(),
                    message: format!("unparsable response body: {}", e),
                }
            })?;
            Self::extract_text(&parsed).ok_or_else(|| empty_response(PROVIDER).into())
        }
    }
}

fn map_transport_error(error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout {
            provider: PROVIDER.to_string(),
            after_ms: crate::DEFAULT_TIMEOUT.as_millis() as u64,
        }
    } else {
        ProviderError::RequestFailed {
            provider: PROVIDER.to_string(),
            status: 0,
            message: error.to_string(),
        }
    }
}

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}
