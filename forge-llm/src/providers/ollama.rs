//! Local Ollama provider
//!
//! Targets `/api/generate`. Streaming output is newline-delimited JSON with
//! a `done` flag; non-streaming returns one object with a `response` field.
//! No credentials: availability means the daemon answers `/api/tags`.

use crate::providers::{empty_response, request_failed, ProviderKind};
use crate::stream::{for_each_json_line, StreamControl};
use crate::{ChunkSink, GenerateRequest, HtmlProvider};
use async_trait::async_trait;
use forge_core::{ForgeResult, ProviderError};
use reqwest::Client;
use serde::{Deserialize, Serialize};

const PROVIDER: &str = "ollama";
const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Environment variable overriding the daemon URL.
pub const BASE_URL_ENV: &str = "OLLAMA_BASE_URL";

#[derive(Debug, Serialize)]
struct Request<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    stream: bool,
    options: Options,
}

#[derive(Debug, Serialize)]
struct Options {
    temperature: f64,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

/// Local Ollama provider.
pub struct OllamaProvider {
    client: Client,
    base_url: String,
}

impl OllamaProvider {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn from_env(client: Client) -> Self {
        let base_url =
            std::env::var(BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(client, base_url)
    }

    /// Ask the daemon whether a model is pulled locally.
    pub async fn check_model_available(&self, model: &str) -> ForgeResult<bool> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| request_failed(PROVIDER, 0, format!("Failed to connect: {}", e)))?;
        if !response.status().is_success() {
            return Ok(false);
        }

        #[derive(Deserialize)]
        struct ListResponse {
            #[serde(default)]
            models: Vec<ModelEntry>,
        }
        #[derive(Deserialize)]
        struct ModelEntry {
            name: String,
        }

        let list: ListResponse = response.json().await.map_err(|e| {
            request_failed(PROVIDER, 0, format!("Failed to parse models list: {}", e))
        })?;
        Ok(list.models.iter().any(|m| m.name.contains(model)))
    }
}

#[async_trait]
impl HtmlProvider for OllamaProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn is_available(&self) -> bool {
        // Local daemon; reachability is checked per-call.
        true
    }

    async fn generate_raw(
        &self,
        model: &str,
        request: &GenerateRequest,
        sink: Option<&dyn ChunkSink>,
    ) -> ForgeResult<String> {
        let body = Request {
            model,
            prompt: &request.prompt,
            system: &request.system,
            stream: request.stream,
            options: Options {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
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
            return Err(request_failed(PROVIDER, status.as_u16(), text).into());
        }

        if request.stream {
            let mut aggregated = String::new();
            for_each_json_line(response, PROVIDER, |line| {
                let Ok(parsed) = serde_json::from_str::<Response>(line) else {
                    return StreamControl::Continue;
                };
                if !parsed.response.is_empty() {
                    if let Some(sink) = sink {
                        sink.send(&parsed.response);
                    }
                    aggregated.push_str(&parsed.response);
                }
                if parsed.done {
                    StreamControl::Stop
                } else {
                    StreamControl::Continue
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
            if parsed.response.is_empty() {
                Err(empty_response(PROVIDER).into())
            } else {
                Ok(parsed.response)
            }
        }
    }
}

fn map_transport_error(error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout {
            provider: PROVIDER.to_string(),
            after_ms: crate::OLLAMA_TIMEOUT.as_millis() as u64,
        }
    } else {
        ProviderError::RequestFailed {
            provider: PROVIDER.to_string(),
            status: 0,
            message: error.to_string(),
        }
    }
}

impl std::fmt::Debug for OllamaProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaProvider")
            .field("base_url", &self.base_url)
            .finish()
    }
}
