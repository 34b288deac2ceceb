//! Streaming wire-format readers
//!
//! HTTP LLM providers stream as server-sent events (`data: {...}` lines);
//! local Ollama streams newline-delimited JSON. Both readers buffer the
//! byte stream, surface each payload line to a callback, and map transport
//! failures to `StreamError`.

use forge_core::{ForgeResult, ProviderError};
use futures_util::StreamExt;
use reqwest::Response;

/// Control returned by line callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamControl {
    Continue,
    Stop,
}

/// Read an SSE body, invoking `on_data` for every non-empty `data:` payload.
/// Comment lines and event/id fields are skipped; the callback decides when
/// the logical stream is done (e.g. on an `[DONE]` sentinel).
pub async fn for_each_sse_data<F>(
    response: Response,
    provider: &str,
    mut on_data: F,
) -> ForgeResult<()>
where
    F: FnMut(&str) -> StreamControl,
{
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();

    while let Some(chunk) = stream.next().await {
        let bytes = chunk.map_err(|e| ProviderError::StreamError {
            provider: provider.to_string(),
            message: e.to_string(),
        })?;
        buffer.push_str(&String::from_utf8_lossy(&bytes));

        while let Some(newline) = buffer.find('\n') {
            let line: String = buffer.drain(..=newline).collect();
            let line = line.trim_end();
            let Some(payload) = line.strip_prefix("data:") else {
                continue;
            };
            let payload = payload.trim();
            if payload.is_empty() {
                continue;
            }
            if on_data(payload) == StreamControl::Stop {
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Read a newline-delimited JSON body, invoking `on_line` per line.
pub async fn for_each_json_line<F>(
    response: Response,
    provider: &str,
    mut on_line: F,
) -> ForgeResult<()>
where
    F: FnMut(&str) -> StreamControl,
{
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();

    while let Some(chunk) = stream.next().await {
        let bytes = chunk.map_err(|e| ProviderError::StreamError {
            provider: provider.to_string(),
            message: e.to_string(),
        })?;
        buffer.push_str(&String::from_utf8_lossy(&bytes));

        while let Some(newline) = buffer.find('\n') {
            let line: String = buffer.drain(..=newline).collect();
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if on_line(line) == StreamControl::Stop {
                return Ok(());
            }
        }
    }
    // Flush a trailing line without a newline.
    let tail = buffer.trim();
    if !tail.is_empty() {
        on_line(tail);
    }
    Ok(())
}
