//! OpenAI-compatible provider
//!
//! Targets `/chat/completions` on any OpenAI-shaped endpoint. Streaming
//! consumes `data:` SSE lines with `choices[0].delta.content` and stops at
//! the `[DONE]` sentinel.

use crate::providers::{empty_response, request_failed, ProviderKind};
use crate::stream::{for_each_sse_data, StreamControl};
use crate::{ChunkSink, GenerateRequest, HtmlProvider};
use async_trait::async_trait;
use forge_core::{ForgeResult, ProviderError};
use reqwest::Client;
use serde::{Deserialize, Serialize};

const PROVIDER: &str = "openai-compatible";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Sentinel payload ending an OpenAI SSE stream.
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Serialize)]
struct Request<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    temperature: f64,
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
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<MessageBody>,
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Chat-completions provider for OpenAI and compatible endpoints.
pub struct OpenAiProvider {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(client: Client, api_key: Option<String>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            api_key,
            base_url: base_url.into(),
        }
    }

    pub fn from_env(client: Client) -> Self {
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(client, std::env::var(API_KEY_ENV).ok(), base_url)
    }
}

#[async_trait]
impl HtmlProvider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAiCompatible
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

        let mut messages = Vec::with_capacity(2);
        if !request.system.is_empty() {
            messages.push(Message {
                role: "system",
                content: &request.system,
            });
        }
        messages.push(Message {
            role: "user",
            content: &request.prompt,
        });

        let body = Request {
            model,
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: request.stream,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
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
                if payload == DONE_SENTINEL {
                    return StreamControl::Stop;
                }
                if let Ok(parsed) = serde_json::from_str::<Response>(payload) {
                    let delta = parsed
                        .choices
                        .first()
                        .and_then(|c| c.delta.as_ref())
                        .and_then(|d| d.content.as_deref());
                    if let Some(text) = delta {
                        if let Some(sink) = sink {
                            sink.send(text);
                        }
                        aggregated.push_str(text);
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
            parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message)
                .and_then(|m| m.content)
                .filter(|text| !text.is_empty())
                .ok_or_else(|| empty_response(PROVIDER).into())
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

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}
