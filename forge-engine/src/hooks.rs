//! Lifecycle hook bus
//!
//! A fixed set of hook points brackets every pipeline stage. Handlers run
//! in priority-then-insertion order and may replace the state. A handler
//! that errors or panics is captured into the state's error list and never
//! stops the run; after a capture, `OnError` handlers fire (unless the
//! failing point is `OnError` itself).

use forge_core::Score;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// The fixed lifecycle points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPoint {
    BeforeContext,
    AfterContext,
    BeforeEnhance,
    AfterEnhance,
    BeforeGenerate,
    AfterGenerate,
    BeforeValidate,
    AfterValidate,
    BeforePersist,
    AfterPersist,
    OnError,
}

impl HookPoint {
    /// All points in lifecycle order.
    pub const ALL: &'static [HookPoint] = &[
        HookPoint::BeforeContext,
        HookPoint::AfterContext,
        HookPoint::BeforeEnhance,
        HookPoint::AfterEnhance,
        HookPoint::BeforeGenerate,
        HookPoint::AfterGenerate,
        HookPoint::BeforeValidate,
        HookPoint::AfterValidate,
        HookPoint::BeforePersist,
        HookPoint::AfterPersist,
        HookPoint::OnError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookPoint::BeforeContext => "before_context",
            HookPoint::AfterContext => "after_context",
            HookPoint::BeforeEnhance => "before_enhance",
            HookPoint::AfterEnhance => "after_enhance",
            HookPoint::BeforeGenerate => "before_generate",
            HookPoint::AfterGenerate => "after_generate",
            HookPoint::BeforeValidate => "before_validate",
            HookPoint::AfterValidate => "after_validate",
            HookPoint::BeforePersist => "before_persist",
            HookPoint::AfterPersist => "after_persist",
            HookPoint::OnError => "on_error",
        }
    }

    /// Parse a point name as used in plugin manifests.
    pub fn parse(s: &str) -> Option<Self> {
        HookPoint::ALL.iter().copied().find(|p| p.as_str() == s)
    }
}

impl std::fmt::Display for HookPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One captured handler failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookFailure {
    pub point: HookPoint,
    pub handler: String,
    pub error: String,
}

/// Typed state threaded through a pipeline run. Hooks receive it by value
/// and may return a replacement; unset fields stay unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub prompt: String,
    pub enhanced: Option<String>,
    pub context: Option<String>,
    pub html: Option<String>,
    pub score: Option<Score>,
    pub model: Option<String>,
    /// Per-stage durations in milliseconds.
    pub timings: HashMap<String, u64>,
    /// Captured handler failures; never empties a run.
    pub hook_errors: Vec<HookFailure>,
    /// Set before `OnError` handlers run.
    pub error: Option<String>,
}

impl PipelineState {
    pub fn for_prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

/// Handler outcome: a replacement state, no change, or an error message.
pub type HookResult = Result<Option<PipelineState>, String>;

/// A hook handler. Must be panic-tolerant from the bus's point of view;
/// panics are caught and captured like errors.
pub type HookHandler = Arc<dyn Fn(PipelineState) -> HookResult + Send + Sync>;

struct Registration {
    name: String,
    priority: i32,
    seq: u64,
    handler: HookHandler,
}

/// The in-process hook bus.
///
/// Registration is expected during startup or plugin enable/disable; those
/// mutations serialize through the inner lock.
pub struct HookBus {
    registrations: RwLock<HashMap<HookPoint, Vec<Registration>>>,
    seq: AtomicU64,
}

impl HookBus {
    pub fn new() -> Self {
        Self {
            registrations: RwLock::new(HashMap::new()),
            seq: AtomicU64::new(0),
        }
    }

    /// Register a handler. Lower priority runs first; insertion order
    /// breaks ties.
    pub fn register(
        &self,
        point: HookPoint,
        name: impl Into<String>,
        priority: i32,
        handler: HookHandler,
    ) {
        let registration = Registration {
            name: name.into(),
            priority,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            handler,
        };
        let mut registrations = self.registrations.write().expect("hook registry lock");
        let slot = registrations.entry(point).or_default();
        slot.push(registration);
        slot.sort_by_key(|r| (r.priority, r.seq));
    }

    /// Remove every handler whose name starts with `prefix` (a plugin's
    /// namespace), across all points. Returns how many were removed.
    pub fn unregister_prefix(&self, prefix: &str) -> usize {
        let mut registrations = self.registrations.write().expect("hook registry lock");
        let mut removed = 0;
        for slot in registrations.values_mut() {
            let before = slot.len();
            slot.retain(|r| !r.name.starts_with(prefix));
            removed += before - slot.len();
        }
        removed
    }

    /// Number of handlers registered at a point.
    pub fn count(&self, point: HookPoint) -> usize {
        self.registrations
            .read()
            .expect("hook registry lock")
            .get(&point)
            .map(|slot| slot.len())
            .unwrap_or(0)
    }

    /// Run every handler at `point` in order. Each may replace the state;
    /// failures are captured and execution continues. After any capture,
    /// `OnError` handlers run (never recursively).
    pub fn run(&self, point: HookPoint, mut state: PipelineState) -> PipelineState {
        let handlers: Vec<(String, HookHandler)> = {
            let registrations = self.registrations.read().expect("hook registry lock");
            registrations
                .get(&point)
                .map(|slot| {
                    slot.iter()
                        .map(|r| (r.name.clone(), Arc::clone(&r.handler)))
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut captured_failure = false;
        for (name, handler) in handlers {
            let input = state.clone();
            match catch_unwind(AssertUnwindSafe(|| handler(input))) {
                Ok(Ok(Some(next))) => state = next,
                Ok(Ok(None)) => {}
                Ok(Err(error)) => {
                    tracing::warn!(point = %point, handler = %name, %error, "Hook handler failed");
                    state.hook_errors.push(HookFailure {
                        point,
                        handler: name,
                        error,
                    });
                    captured_failure = true;
                }
                Err(panic) => {
                    let error = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "panic".to_string());
                    tracing::warn!(point = %point, handler = %name, %error, "Hook handler panicked");
                    state.hook_errors.push(HookFailure {
                        point,
                        handler: name,
                        error,
                    });
                    captured_failure = true;
                }
            }
        }

        if captured_failure && point != HookPoint::OnError {
            state = self.run(HookPoint::OnError, state);
        }
        state
    }
}

impl Default for HookBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HookBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registrations = self.registrations.read().expect("hook registry lock");
        let counts: HashMap<&str, usize> = registrations
            .iter()
            .map(|(point, slot)| (point.as_str(), slot.len()))
            .collect();
        f.debug_struct("HookBus").field("handlers", &counts).finish()
    }
}
