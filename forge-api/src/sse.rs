//! The SSE channel primitive
//!
//! One broadcaster shared by the progress route, watch mode, and live
//! reload. Built on a tokio broadcast channel: `send`/`broadcast` are
//! best-effort and ordered, destroyed clients are pruned by the guard's
//! drop, heartbeat comments keep intermediaries from closing idle
//! connections, and a full channel answers 503.

use crate::error::ApiError;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

/// One wire message.
#[derive(Debug, Clone)]
pub struct SseMessage {
    /// Event name; plain `message` events omit it.
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Channel settings.
#[derive(Debug, Clone, Copy)]
pub struct SseChannelOptions {
    pub heartbeat: Duration,
    pub max_clients: usize,
}

impl Default for SseChannelOptions {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(15),
            max_clients: 64,
        }
    }
}

/// Broadcast SSE channel.
pub struct SseChannel {
    tx: tokio::sync::broadcast::Sender<SseMessage>,
    clients: Arc<AtomicUsize>,
    options: SseChannelOptions,
    closed: CancellationToken,
}

impl SseChannel {
    pub fn new(options: SseChannelOptions) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(256);
        Self {
            tx,
            clients: Arc::new(AtomicUsize::new(0)),
            options,
            closed: CancellationToken::new(),
        }
    }

    /// Send a named event. Best-effort: with no clients connected the
    /// message is dropped.
    pub fn send(&self, event: impl Into<String>, data: impl Into<String>, id: Option<String>) {
        let _ = self.tx.send(SseMessage {
            event: Some(event.into()),
            data: data.into(),
            id,
        });
    }

    /// Send an unnamed `message` event.
    pub fn broadcast(&self, data: impl Into<String>) {
        let _ = self.tx.send(SseMessage {
            event: None,
            data: data.into(),
            id: None,
        });
    }

    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }

    /// Disconnect every client. Further handler calls still work; the
    /// channel itself stays usable.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Build the route handler response. Returns 503 once `max_clients`
    /// are connected; exactly `max_clients` concurrent clients is allowed.
    pub fn handler(
        &self,
    ) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
        let connected = self.clients.fetch_add(1, Ordering::SeqCst);
        if connected >= self.options.max_clients {
            self.clients.fetch_sub(1, Ordering::SeqCst);
            return Err(ApiError::channel_full());
        }

        let guard = ClientGuard {
            clients: Arc::clone(&self.clients),
        };
        let stream = BroadcastStream::new(self.tx.subscribe())
            .take_until(self.closed.clone().cancelled_owned())
            .filter_map(move |message: Result<SseMessage, BroadcastStreamRecvError>| {
                // The guard lives inside the stream; dropping the stream
                // (client gone) decrements the count.
                let _ = &guard;
                let event = match message {
                    Ok(message) => {
                        let mut event = Event::default().data(message.data);
                        if let Some(name) = message.event {
                            event = event.event(name);
                        }
                        if let Some(id) = message.id {
                            event = event.id(id);
                        }
                        Some(Ok(event))
                    }
                    // A lagged client just misses messages.
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        Some(Ok(Event::default().comment(format!("lagged {}", skipped))))
                    }
                };
                futures_util::future::ready(event)
            });

        Ok(Sse::new(stream).keep_alive(
            KeepAlive::new()
                .interval(self.options.heartbeat)
                .text("heartbeat"),
        ))
    }
}

impl std::fmt::Debug for SseChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseChannel")
            .field("clients", &self.client_count())
            .field("max_clients", &self.options.max_clients)
            .finish()
    }
}

struct ClientGuard {
    clients: Arc<AtomicUsize>,
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.clients.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// PIPELINE EVENT BRIDGE
// ============================================================================

/// Forwards pipeline events onto an SSE channel as JSON payloads.
pub struct ProgressEmitter {
    channel: Arc<SseChannel>,
}

impl ProgressEmitter {
    pub fn new(channel: Arc<SseChannel>) -> Self {
        Self { channel }
    }
}

impl forge_engine::EventEmitter for ProgressEmitter {
    fn emit(&self, event: &forge_engine::PipelineEvent) {
        let name = match event {
            forge_engine::PipelineEvent::Start { .. } => "start",
            forge_engine::PipelineEvent::Progress { .. } => "progress",
            forge_engine::PipelineEvent::Complete { .. } => "complete",
            forge_engine::PipelineEvent::Error { .. } => "error",
        };
        match serde_json::to_string(event) {
            Ok(payload) => self.channel.send(name, payload, None),
            Err(error) => tracing::warn!(%error, "Unserializable pipeline event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(max_clients: usize) -> SseChannel {
        SseChannel::new(SseChannelOptions {
            heartbeat: Duration::from_secs(15),
            max_clients,
        })
    }

    #[tokio::test]
    async fn test_client_cap_is_exact() {
        let sse = channel(2);
        let first = sse.handler().unwrap();
        let second = sse.handler().unwrap();
        assert_eq!(sse.client_count(), 2);
        // One over the cap: refused with ChannelFull.
        let third = sse.handler();
        assert!(matches!(third, Err(ref e) if e.code == crate::error::ErrorCode::ChannelFull));
        drop(first);
        drop(second);
    }

    #[tokio::test]
    async fn test_guard_prunes_on_drop() {
        let sse = channel(4);
        let handler = sse.handler().unwrap();
        assert_eq!(sse.client_count(), 1);
        drop(handler);
        assert_eq!(sse.client_count(), 0);
        // The slot is reusable.
        let _again = sse.handler().unwrap();
        assert_eq!(sse.client_count(), 1);
    }

    #[tokio::test]
    async fn test_send_order_preserved() {
        let sse = channel(4);
        let mut rx = sse.tx.subscribe();
        sse.send("progress", "one", None);
        sse.broadcast("two");
        sse.send("complete", "three", Some("3".to_string()));

        assert_eq!(rx.recv().await.unwrap().data, "one");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.data, "two");
        assert!(second.event.is_none());
        let third = rx.recv().await.unwrap();
        assert_eq!(third.id.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_send_without_clients_is_best_effort() {
        let sse = channel(4);
        // No subscribers: must not panic or error.
        sse.send("progress", "dropped", None);
        sse.broadcast("also dropped");
    }

    #[tokio::test]
    async fn test_progress_emitter_serializes_events() {
        let sse = Arc::new(channel(4));
        let mut rx = sse.tx.subscribe();
        let emitter = ProgressEmitter::new(sse.clone());
        forge_engine::EventEmitter::emit(
            &emitter,
            &forge_engine::PipelineEvent::Complete { score: 0.9 },
        );
        let message = rx.recv().await.unwrap();
        assert_eq!(message.event.as_deref(), Some("complete"));
        assert!(message.data.contains("0.9"));
    }
}
