//! Anthropic provider
//!
//! Targets `/v1/messages` with the `x-api-key` header scheme. Streaming
//! consumes `content_block_delta` SSE events and stops at `message_stop`.

use crate::providers::{empty_response, request_failed, ProviderKind};
use crate::stream::{for_each_sse_data, StreamControl};
use crate::{ChunkSink, GenerateRequest, HtmlProvider};
use async_trait::async_trait;
use forge_core::{ForgeResult, ProviderError};
use reqwest::Client;
use serde::{Deserialize, Serialize};

const PROVIDER: &str = "anthropic";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

#[derive(Debug, Serialize)]
struct Request<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    messages: Vec<Message<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    kind: String,
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
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

/// Anthropic messages-API provider.
pub struct AnthropicProvider {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(client: Client, api_key: Option<String>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            api_key,
            base_url: base_url.into(),
        }
    }

    pub fn from_env(client: Client) -> Self {
        let base_url =
            std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(client, std::env::var(API_KEY_ENV).ok(), base_url)
    }
}

#[async_trait]
impl HtmlProvider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
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
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ProviderError::NotConfigured {
                provider: PROVIDER.to_string(),
            }
            .into());
        };

        let body = Request {
            model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: &request.system,
            messages: vec![Message {
                role: "user",
                content: &request.prompt,
            }],
            stream: request.stream,
        };

        let url = format!("{}/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

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
                let Ok(event) = serde_json::from_str::<StreamEvent>(payload) else {
                    return StreamControl::Continue;
                };
                match event.kind.as_str() {
                    "content_block_delta" => {
                        if let Some(delta) = event.delta {
                            if !delta.text.is_empty() {
                                if let Some(sink) = sink {
                                    sink.send(&delta.text);
                                }
                                aggregated.push_str(&delta.text);
                            }
                        }
                        StreamControl::Continue
                    }
                    "message_stop" => StreamControl::Stop,
                    _ => StreamControl::Continue,
                }
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
            let text: String = parsed
                .content
                .iter()
                .map(|block| block.text.as_str())
                .collect();
            if text.is_empty() {
                Err(empty_response(PROVIDER).into())
            } else {
                Ok(text)
            }
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

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}
