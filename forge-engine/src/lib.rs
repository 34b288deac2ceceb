//! FORGE Engine - Generation Orchestration
//!
//! The pieces between an intent and a scored HTML document:
//!
//! - `probe`: pluggable context signals with per-probe TTL caching
//! - `enhance`: deterministic prompt assembly and the system instruction
//! - `validate`: the four-axis quality rubric (Conatus / Ratio / Laetitia /
//!   Natura) over a replaceable indicator set
//! - `sanitize`: static scan and best-effort strip of dangerous patterns
//! - `hooks`: the lifecycle hook bus with typed pipeline state
//! - `plugin`: plugin discovery, enable state, hook/command wiring
//! - `strategy`: best-of-N, refinement chain, genetic evolution, duels
//! - `pipeline`: the end-to-end conductor
//! - `watch`: filesystem-triggered regeneration

pub mod enhance;
pub mod hooks;
pub mod pipeline;
pub mod plugin;
pub mod probe;
pub mod sanitize;
pub mod strategy;
pub mod validate;
pub mod watch;

pub use enhance::{build_system_instruction, enhance, EnhanceContext};
pub use hooks::{HookBus, HookFailure, HookHandler, HookPoint, HookResult, PipelineState};
pub use pipeline::{
    EventEmitter, NullEmitter, Pipeline, PipelineDeps, PipelineEvent, PipelineResult,
    PipelineStage, RunOptions,
};
pub use plugin::{CommandHandler, Plugin, PluginManifest, PluginRegistry, PluginReport};
pub use probe::{ClockProbe, ContextProbe, ProbeSet, SystemProbe, WorkspaceProbe};
pub use sanitize::{sanitize, scan, SanitizeOptions, SanitizeOutcome, ScanIssue, ScanReport, Severity};
pub use strategy::{
    build_refinement_prompt, Candidate, ChainOptions, DuelOutcome, EvolveOptions, EvolveOutcome,
    Individual, IterationRecord, RefineOptions, Strategies, VariantReport,
};
pub use validate::{default_indicators, Axis, Indicator, IndicatorTest, Validator};
pub use watch::{is_watchable, WatchEvent, WatchOptions, WatchService};
