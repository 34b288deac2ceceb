//! Shared application state

use crate::sse::SseChannel;
use forge_engine::{Pipeline, Validator};
use forge_llm::Router;
use forge_store::{Grimoire, History};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// State injected into every route handler.
#[derive(Clone)]
pub struct AppState {
    /// Absent when no generation subsystem is configured; `/api/generate`
    /// answers 501 in that case.
    pub pipeline: Option<Arc<Pipeline>>,
    pub router: Arc<Router>,
    pub validator: Arc<Validator>,
    pub history: Arc<History>,
    pub grimoire: Arc<Grimoire>,
    pub progress: Arc<SseChannel>,
    pub started_at: Instant,
    requests: Arc<AtomicU64>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pipeline: Option<Arc<Pipeline>>,
        router: Arc<Router>,
        validator: Arc<Validator>,
        history: Arc<History>,
        grimoire: Arc<Grimoire>,
        progress: Arc<SseChannel>,
    ) -> Self {
        Self {
            pipeline,
            router,
            validator,
            history,
            grimoire,
            progress,
            started_at: Instant::now(),
            requests: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn count_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("pipeline", &self.pipeline.is_some())
            .field("requests", &self.request_count())
            .finish()
    }
}
