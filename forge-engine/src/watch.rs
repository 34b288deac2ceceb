//! Watch mode
//!
//! Watches a prompt file or directory for changes to `*.txt`/`*.md`,
//! debounces bursts, and reruns the pipeline with the file contents as the
//! intent. Results land in a shared latest-HTML slot (served as `/latest`)
//! and on a broadcast channel for SSE subscribers. Change events arriving
//! while a generation is in flight are ignored.

use crate::pipeline::{Pipeline, RunOptions};
use forge_core::{ForgeError, ForgeResult, Intent, IntentOptions};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Default debounce window for change bursts.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Options for a watch session.
#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    pub debounce: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

/// One watch-cycle outcome broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WatchEvent {
    Generated {
        iteration: u64,
        file: String,
        elapsed_ms: u64,
        score: f64,
        grade: String,
    },
    Error {
        iteration: u64,
        file: String,
        message: String,
    },
}

/// Only prompt files trigger regeneration.
pub fn is_watchable(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("txt") | Some("md")
    )
}

/// The watch loop plus its shared outputs.
pub struct WatchService {
    pipeline: Arc<Pipeline>,
    target: PathBuf,
    options: WatchOptions,
    busy: AtomicBool,
    iteration: AtomicU64,
    latest: Arc<tokio::sync::RwLock<Option<String>>>,
    events: tokio::sync::broadcast::Sender<WatchEvent>,
}

impl WatchService {
    pub fn new(pipeline: Arc<Pipeline>, target: impl Into<PathBuf>, options: WatchOptions) -> Arc<Self> {
        let (events, _) = tokio::sync::broadcast::channel(64);
        Arc::new(Self {
            pipeline,
            target: target.into(),
            options,
            busy: AtomicBool::new(false),
            iteration: AtomicU64::new(0),
            latest: Arc::new(tokio::sync::RwLock::new(None)),
            events,
        })
    }

    /// The most recent generated HTML, shared with the dashboard's
    /// `/latest` handler.
    pub fn latest(&self) -> Arc<tokio::sync::RwLock<Option<String>>> {
        Arc::clone(&self.latest)
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }

    /// Run the watch loop until cancelled. Fires immediately when the
    /// target is a file.
    pub async fn run(self: Arc<Self>, cancel: &CancellationToken) -> ForgeResult<()> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<PathBuf>();

        let sender = tx.clone();
        let mut watcher =
            RecommendedWatcher::new(
                move |result: notify::Result<Event>| {
                    let Ok(event) = result else { return };
                    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                        return;
                    }
                    for path in event.paths {
                        if is_watchable(&path) {
                            let _ = sender.send(path);
                        }
                    }
                },
                Config::default(),
            )
            .map_err(|e| ForgeError::stage("watch", e.to_string()))?;
        watcher
            .watch(&self.target, RecursiveMode::Recursive)
            .map_err(|e| ForgeError::stage("watch", e.to_string()))?;

        tracing::info!(target = %self.target.display(), "Watching for prompt changes");

        if self.target.is_file() {
            self.clone().spawn_trigger(self.target.clone());
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = rx.recv() => {
                    let Some(path) = changed else { break };
                    // Debounce: absorb the burst, keep the last path.
                    let mut path = path;
                    let deadline = Instant::now() + self.options.debounce;
                    loop {
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        if remaining.is_zero() {
                            break;
                        }
                        match tokio::time::timeout(remaining, rx.recv()).await {
                            Ok(Some(next)) => path = next,
                            Ok(None) => return Ok(()),
                            Err(_) => break,
                        }
                    }
                    if self.busy.load(Ordering::SeqCst) {
                        tracing::debug!(file = %path.display(), "Generation in flight, ignoring change");
                        continue;
                    }
                    self.clone().spawn_trigger(path);
                }
            }
        }
        Ok(())
    }

    fn spawn_trigger(self: Arc<Self>, path: PathBuf) {
        if self.busy.swap(true, Ordering::SeqCst) {
            return;
        }
        tokio::spawn(async move {
            self.trigger(&path).await;
            self.busy.store(false, Ordering::SeqCst);
        });
    }

    /// One regeneration cycle from the file's contents.
    async fn trigger(&self, path: &Path) {
        let iteration = self.iteration.fetch_add(1, Ordering::SeqCst) + 1;
        let file = path.display().to_string();
        let started = Instant::now();

        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(error) => {
                let _ = self.events.send(WatchEvent::Error {
                    iteration,
                    file,
                    message: error.to_string(),
                });
                return;
            }
        };

        let intent = match Intent::new(text.trim(), IntentOptions::default()) {
            Ok(intent) => intent,
            Err(error) => {
                let _ = self.events.send(WatchEvent::Error {
                    iteration,
                    file,
                    message: error.to_string(),
                });
                return;
            }
        };

        let cancel = CancellationToken::new();
        match self
            .pipeline
            .run(&intent, &RunOptions::default(), None, &cancel)
            .await
        {
            Ok(result) => {
                *self.latest.write().await = Some(result.html.clone());
                let _ = self.events.send(WatchEvent::Generated {
                    iteration,
                    file,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    score: result.score.total,
                    grade: result.grade.as_str().to_string(),
                });
            }
            Err(error) => {
                let _ = self.events.send(WatchEvent::Error {
                    iteration,
                    file,
                    message: error.to_string(),
                });
            }
        }
    }
}

impl std::fmt::Debug for WatchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchService")
            .field("target", &self.target)
            .field("debounce", &self.options.debounce)
            .finish()
    }
}
