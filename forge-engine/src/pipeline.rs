//! The end-to-end pipeline
//!
//! `Run` drives: probes → enhance → generate → validate → persist, each
//! stage bracketed by its hook points and reported on the event emitter.
//! Stage errors surface with the originating stage name; `OnError` hooks
//! run before the error returns. Persistence failures never invalidate a
//! successful generation, and telemetry records every attempt.

use crate::enhance::{build_system_instruction, enhance, EnhanceContext};
use crate::hooks::{HookBus, HookFailure, HookPoint, PipelineState};
use crate::probe::ProbeSet;
use crate::sanitize::{sanitize, scan, SanitizeOptions};
use crate::strategy::{ChainOptions, IterationRecord, Strategies};
use crate::validate::Validator;
use forge_core::{
    output_filename, prompt_hash, short_id, ForgeConfig, ForgeError, ForgeResult, Grade,
    HistoryEntry, Intent, Score, TelemetryRecord,
};
use forge_llm::{ChunkSink, GenerateRequest, Router};
use forge_store::{Grimoire, History, ProfileStore, Telemetry};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Overall bound on the context-gathering stage; late probes are dropped.
const CONTEXT_STAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// The ordered pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    Context,
    Enhance,
    Generate,
    Validate,
    Persist,
}

impl PipelineStage {
    pub fn label(&self) -> &'static str {
        match self {
            PipelineStage::Context => "context",
            PipelineStage::Enhance => "enhance",
            PipelineStage::Generate => "generate",
            PipelineStage::Validate => "validate",
            PipelineStage::Persist => "persist",
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Progress events broadcast to watchers of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PipelineEvent {
    Start { prompt: String },
    Progress { stage: PipelineStage },
    Complete { score: f64 },
    Error { stage: PipelineStage, message: String },
}

/// Receives pipeline events; the API attaches its SSE channel here.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: &PipelineEvent);
}

/// Emitter that drops everything.
pub struct NullEmitter;

impl EventEmitter for NullEmitter {
    fn emit(&self, _event: &PipelineEvent) {}
}

/// Per-run options beyond what the intent carries.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Also inscribe the prompt into the grimoire.
    pub inscribe: bool,
    /// Write the rendered HTML file into the output directory.
    pub render: bool,
}

/// The outcome of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub html: String,
    pub score: Score,
    pub grade: Grade,
    pub context: String,
    pub iterations: Vec<IterationRecord>,
    pub model: String,
    pub provider: String,
    pub enhanced_prompt: String,
    pub duration_ms: u64,
    pub history_id: Option<String>,
    pub output_path: Option<PathBuf>,
    pub sanitizer_removed: Vec<String>,
    pub hook_errors: Vec<HookFailure>,
    /// Persistence failure that did not invalidate the generation.
    pub persist_error: Option<String>,
}

/// Everything the pipeline needs; built once at startup.
pub struct PipelineDeps {
    pub router: Arc<Router>,
    pub validator: Arc<Validator>,
    pub probes: ProbeSet,
    pub hooks: Arc<HookBus>,
    pub history: Arc<History>,
    pub grimoire: Arc<Grimoire>,
    pub telemetry: Arc<Telemetry>,
    pub profile: Arc<ProfileStore>,
    pub emitter: Arc<dyn EventEmitter>,
    pub config: ForgeConfig,
}

/// The conductor.
pub struct Pipeline {
    router: Arc<Router>,
    validator: Arc<Validator>,
    strategies: Strategies,
    probes: ProbeSet,
    hooks: Arc<HookBus>,
    history: Arc<History>,
    grimoire: Arc<Grimoire>,
    telemetry: Arc<Telemetry>,
    profile: Arc<ProfileStore>,
    emitter: Arc<dyn EventEmitter>,
    config: ForgeConfig,
}

impl Pipeline {
    pub fn new(deps: PipelineDeps) -> Self {
        let strategies = Strategies::new(
            Arc::clone(&deps.router),
            Arc::clone(&deps.validator),
            deps.config.generation.parallelism,
        );
        Self {
            router: deps.router,
            validator: deps.validator,
            strategies,
            probes: deps.probes,
            hooks: deps.hooks,
            history: deps.history,
            grimoire: deps.grimoire,
            telemetry: deps.telemetry,
            profile: deps.profile,
            emitter: deps.emitter,
            config: deps.config,
        }
    }

    /// Run the full pipeline for one intent.
    pub async fn run(
        &self,
        intent: &Intent,
        options: &RunOptions,
        sink: Option<Arc<dyn ChunkSink>>,
        cancel: &CancellationToken,
    ) -> ForgeResult<PipelineResult> {
        let started = Instant::now();
        if intent.text.trim().is_empty() {
            return Err(ForgeError::invalid_input("intent text is empty"));
        }

        self.emitter.emit(&PipelineEvent::Start {
            prompt: intent.text.clone(),
        });
        let mut state = PipelineState::for_prompt(&intent.text);

        // ---- context -------------------------------------------------
        self.emitter.emit(&PipelineEvent::Progress {
            stage: PipelineStage::Context,
        });
        state = self.hooks.run(HookPoint::BeforeContext, state);
        let stage_start = Instant::now();
        let context = tokio::time::timeout(CONTEXT_STAGE_TIMEOUT, self.probes.gather())
            .await
            .unwrap_or_default();
        state.context = Some(context);
        state
            .timings
            .insert("context".to_string(), stage_start.elapsed().as_millis() as u64);
        state = self.hooks.run(HookPoint::AfterContext, state);

        // ---- enhance -------------------------------------------------
        self.emitter.emit(&PipelineEvent::Progress {
            stage: PipelineStage::Enhance,
        });
        state = self.hooks.run(HookPoint::BeforeEnhance, state);
        let profile = self.profile.load().await.unwrap_or_default();
        let style = profile.default_style.unwrap_or(intent.options.style);
        let enhance_ctx = EnhanceContext {
            style,
            language: intent.options.language.clone(),
            context_block: state.context.clone().unwrap_or_default(),
            profile_hint: profile.hint,
            persona: intent.options.persona.clone(),
            theme: intent.options.theme.clone(),
        };
        state.enhanced = Some(enhance(&state.prompt, &enhance_ctx));
        let system = build_system_instruction(style, &intent.options.language);
        state = self.hooks.run(HookPoint::AfterEnhance, state);
        let enhanced_prompt = state
            .enhanced
            .clone()
            .unwrap_or_else(|| intent.text.clone());

        // ---- generate ------------------------------------------------
        self.emitter.emit(&PipelineEvent::Progress {
            stage: PipelineStage::Generate,
        });
        state = self.hooks.run(HookPoint::BeforeGenerate, state);
        let request = GenerateRequest {
            prompt: enhanced_prompt.clone(),
            system,
            model_alias: intent.options.provider_alias.clone(),
            max_tokens: self.config.generation.max_tokens,
            temperature: self.config.generation.temperature,
            stream: sink.is_some(),
        };

        let stage_start = Instant::now();
        let generated = self.generate(intent, &request, sink, cancel).await;
        let generate_ms = stage_start.elapsed().as_millis() as u64;
        let (mut html, iterations, provider, model) = match generated {
            Ok(outcome) => outcome,
            Err(error) => {
                // Cancellation skips persistence entirely, telemetry included.
                if !error.is_cancelled() {
                    self.record_failure(&request, generate_ms).await;
                }
                return Err(self.fail(PipelineStage::Generate, state, error));
            }
        };
        state.timings.insert("generate".to_string(), generate_ms);
        state.html = Some(html.clone());
        state.model = Some(model.clone());
        state = self.hooks.run(HookPoint::AfterGenerate, state);

        // ---- validate ------------------------------------------------
        self.emitter.emit(&PipelineEvent::Progress {
            stage: PipelineStage::Validate,
        });
        state = self.hooks.run(HookPoint::BeforeValidate, state);
        let mut sanitizer_removed = Vec::new();
        if self.config.security.sanitize {
            let report = scan(&html);
            if !report.safe {
                tracing::warn!(issues = report.issues.len(), "Generated HTML flagged by scan");
            }
            let outcome = sanitize(
                &html,
                SanitizeOptions {
                    strip_scripts: self.config.security.strip_scripts,
                    ..Default::default()
                },
            );
            html = outcome.code;
            sanitizer_removed = outcome.removed;
        }
        let score = self.validator.validate(&html);
        state.html = Some(html.clone());
        state.score = Some(score.clone());
        state = self.hooks.run(HookPoint::AfterValidate, state);

        // ---- persist -------------------------------------------------
        self.emitter.emit(&PipelineEvent::Progress {
            stage: PipelineStage::Persist,
        });
        state = self.hooks.run(HookPoint::BeforePersist, state);
        let mut persist_error = None;

        let entry = HistoryEntry {
            id: short_id(),
            prompt: intent.text.clone(),
            enhanced_prompt_hash: prompt_hash(&enhanced_prompt),
            model: model.clone(),
            provider: provider.clone(),
            score: score.clone(),
            grade: score.grade,
            code_length: html.len(),
            style,
            tags: Vec::new(),
            at: chrono::Utc::now(),
        };
        let history_id = match self.history.record(&entry, &html).await {
            Ok(id) => Some(id),
            Err(error) => {
                tracing::error!(%error, "History persistence failed");
                persist_error = Some(error.to_string());
                None
            }
        };

        if options.inscribe {
            let inscribed = self
                .grimoire
                .inscribe(&intent.text, Vec::new(), "generated", Default::default())
                .await;
            match inscribed {
                Ok(entry) => {
                    if let Err(error) = self.grimoire.update_score(&entry.id, score.total).await {
                        tracing::warn!(%error, "Grimoire score update failed");
                    }
                }
                Err(error) => {
                    tracing::warn!(%error, "Grimoire inscription failed");
                    persist_error.get_or_insert(error.to_string());
                }
            }
        }

        let telemetry_record = TelemetryRecord {
            at: chrono::Utc::now(),
            model: model.clone(),
            in_tokens: forge_llm::estimate_tokens(&enhanced_prompt),
            out_tokens: forge_llm::estimate_tokens(&html),
            cost_est: forge_llm::estimate_cost(&model, 0, forge_llm::estimate_tokens(&html)),
            duration_ms: generate_ms,
            success: true,
        };
        if let Err(error) = self.telemetry.record(telemetry_record).await {
            tracing::warn!(%error, "Telemetry persistence failed");
        }

        let output_path = if options.render {
            match self.render(&intent.text, &html).await {
                Ok(path) => Some(path),
                Err(error) => {
                    tracing::error!(%error, "Render failed");
                    persist_error.get_or_insert(error.to_string());
                    None
                }
            }
        } else {
            None
        };
        state = self.hooks.run(HookPoint::AfterPersist, state);

        self.emitter.emit(&PipelineEvent::Complete { score: score.total });
        Ok(PipelineResult {
            html,
            grade: score.grade,
            score,
            context: state.context.clone().unwrap_or_default(),
            iterations,
            model,
            provider,
            enhanced_prompt,
            duration_ms: started.elapsed().as_millis() as u64,
            history_id,
            output_path,
            sanitizer_removed,
            hook_errors: state.hook_errors,
            persist_error,
        })
    }

    /// Generate according to the intent's iteration settings. Returns
    /// `(html, iteration records, provider, model)`.
    async fn generate(
        &self,
        intent: &Intent,
        request: &GenerateRequest,
        sink: Option<Arc<dyn ChunkSink>>,
        cancel: &CancellationToken,
    ) -> ForgeResult<(String, Vec<IterationRecord>, String, String)> {
        if intent.options.refine {
            let options = ChainOptions {
                threshold: self.config.generation.iterate_threshold,
                max_rounds: self.config.generation.max_rounds,
                patience: 2,
            };
            let (candidate, records) = self
                .strategies
                .iteration_chain(request, &options, cancel)
                .await?;
            return Ok((
                candidate.html,
                records,
                candidate.meta.provider,
                candidate.meta.resolved_model,
            ));
        }

        if intent.options.iterations > 1 {
            let candidate = self
                .strategies
                .best_of_n(request, intent.options.iterations, cancel)
                .await?;
            let record = IterationRecord {
                iteration: 0,
                total: candidate.score.total,
                improved: true,
            };
            return Ok((
                candidate.html,
                vec![record],
                candidate.meta.provider,
                candidate.meta.resolved_model,
            ));
        }

        let (html, meta) = self
            .router
            .generate(request, sink.as_deref(), cancel)
            .await?;
        Ok((html, Vec::new(), meta.provider, meta.resolved_model))
    }

    /// Emit the error event, give `OnError` hooks their look, and wrap the
    /// error with the stage name. `OnError` runs before every return;
    /// cancellation additionally skips the broadcast and the stage wrap so
    /// callers see `Cancelled` as-is.
    fn fail(
        &self,
        stage: PipelineStage,
        mut state: PipelineState,
        error: ForgeError,
    ) -> ForgeError {
        state.error = Some(error.to_string());
        if error.is_cancelled() {
            self.hooks.run(HookPoint::OnError, state);
            return error;
        }
        self.emitter.emit(&PipelineEvent::Error {
            stage,
            message: error.to_string(),
        });
        self.hooks.run(HookPoint::OnError, state);
        ForgeError::stage(stage.label(), error.to_string())
    }

    async fn record_failure(&self, request: &GenerateRequest, duration_ms: u64) {
        let record = TelemetryRecord {
            at: chrono::Utc::now(),
            model: forge_llm::resolve_model(&request.model_alias),
            in_tokens: forge_llm::estimate_tokens(&request.prompt),
            out_tokens: 0,
            cost_est: 0.0,
            duration_ms,
            success: false,
        };
        if let Err(error) = self.telemetry.record(record).await {
            tracing::warn!(%error, "Failure telemetry persistence failed");
        }
    }

    async fn render(&self, intent_text: &str, html: &str) -> ForgeResult<PathBuf> {
        let filename = output_filename(intent_text, chrono::Utc::now().date_naive());
        let path = self.config.paths.output_dir.join(filename);
        tokio::fs::create_dir_all(&self.config.paths.output_dir)
            .await
            .ok();
        tokio::fs::write(&path, html).await.map_err(|e| {
            forge_core::StoreError::WriteFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(path)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("probes", &self.probes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::fixtures::RICH_HTML;
    use forge_core::IntentOptions;
    use forge_llm::{MockHtmlProvider, ProviderKind};
    use forge_store::{Cache, KvStore};
    use std::sync::Mutex;
    use tempfile::TempDir;

    const POOR_HTML: &str = "<html></html>";

    struct CollectEmitter {
        events: Mutex<Vec<PipelineEvent>>,
    }

    impl CollectEmitter {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
            })
        }

        fn events(&self) -> Vec<PipelineEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl EventEmitter for CollectEmitter {
        fn emit(&self, event: &PipelineEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    struct Fixture {
        pipeline: Pipeline,
        emitter: Arc<CollectEmitter>,
        history: Arc<History>,
        _dir: TempDir,
    }

    fn fixture(mock: MockHtmlProvider, sanitize: bool) -> Fixture {
        fixture_with(mock, sanitize, Arc::new(HookBus::new()))
    }

    fn fixture_with(mock: MockHtmlProvider, sanitize_enabled: bool, hooks: Arc<HookBus>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let mut config = ForgeConfig::default();
        config.paths.data_dir = dir.path().to_path_buf();
        config.paths.output_dir = dir.path().join("out");
        config.security.sanitize = sanitize_enabled;

        let kv = Arc::new(KvStore::new(dir.path()));
        let history = Arc::new(History::new(kv.clone()));
        let grimoire = Arc::new(Grimoire::new(kv));
        let telemetry = Arc::new(Telemetry::new(dir.path()));
        let profile = Arc::new(ProfileStore::new(dir.path()));
        let cache = Arc::new(Cache::new(64));
        let emitter = CollectEmitter::new();
        let router = Arc::new(Router::empty().with_provider(Arc::new(mock)));

        let pipeline = Pipeline::new(PipelineDeps {
            router,
            validator: Arc::new(Validator::new()),
            probes: ProbeSet::new(&cache),
            hooks,
            history: history.clone(),
            grimoire,
            telemetry,
            profile,
            emitter: emitter.clone(),
            config,
        });
        Fixture {
            pipeline,
            emitter,
            history,
            _dir: dir,
        }
    }

    fn intent(text: &str) -> Intent {
        Intent::new(
            text,
            IntentOptions {
                provider_alias: "gemini".to_string(),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_happy_path_persists_and_emits_complete() {
        let mock = MockHtmlProvider::new(ProviderKind::Gemini).with_default(RICH_HTML);
        let fx = fixture(mock, false);

        let result = fx
            .pipeline
            .run(
                &intent("track my sleep"),
                &RunOptions::default(),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(matches!(result.grade, Grade::S | Grade::A));
        let id = result.history_id.unwrap();
        let entry = fx.history.get(&id).await.unwrap().unwrap();
        assert_eq!(entry.prompt, "track my sleep");
        assert_eq!(fx.history.get_code(&id).await.unwrap().unwrap(), result.html);

        let completes = fx
            .emitter
            .events()
            .iter()
            .filter(|e| matches!(e, PipelineEvent::Complete { .. }))
            .count();
        assert_eq!(completes, 1);
    }

    #[tokio::test]
    async fn test_refinement_run_returns_improved_document() {
        let mock = MockHtmlProvider::new(ProviderKind::Gemini)
            .push_response(POOR_HTML)
            .push_response(RICH_HTML);
        let fx = fixture(mock, false);
        let mut refine_intent = intent("track my sleep");
        refine_intent.options.refine = true;

        let result = fx
            .pipeline
            .run(
                &refine_intent,
                &RunOptions::default(),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.html, RICH_HTML);
        assert_eq!(result.iterations.len(), 2);
        assert_eq!(result.iterations[0].iteration, 0);
        assert!(result.iterations[1].improved);
    }

    #[tokio::test]
    async fn test_generate_failure_surfaces_stage_and_emits_error() {
        let mock = MockHtmlProvider::new(ProviderKind::Gemini); // always fails
        let fx = fixture(mock, false);

        let err = fx
            .pipeline
            .run(
                &intent("track my sleep"),
                &RunOptions::default(),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("[generate]"));

        let errors: Vec<PipelineEvent> = fx
            .emitter
            .events()
            .into_iter()
            .filter(|e| matches!(e, PipelineEvent::Error { .. }))
            .collect();
        assert_eq!(errors.len(), 1);

        // Failed runs are not persisted to history.
        assert!(fx
            .history
            .list(&forge_store::HistoryFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_empty_intent_rejected_before_enhance() {
        let mock = MockHtmlProvider::new(ProviderKind::Gemini).with_default(RICH_HTML);
        let fx = fixture(mock, false);
        let bad = Intent {
            text: "   ".to_string(),
            options: IntentOptions::default(),
        };
        let err = fx
            .pipeline
            .run(&bad, &RunOptions::default(), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ForgeError::Pipeline(forge_core::PipelineError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn test_sanitizer_replaces_html_and_tracks_removals() {
        let dirty = format!(
            "{}<iframe src=\"evil\"></iframe>",
            RICH_HTML
        );
        let mock = MockHtmlProvider::new(ProviderKind::Gemini).with_default(dirty);
        let fx = fixture(mock, true);

        let result = fx
            .pipeline
            .run(
                &intent("track my sleep"),
                &RunOptions::default(),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(!result.html.contains("<iframe"));
        assert!(!result.sanitizer_removed.is_empty());
    }

    #[tokio::test]
    async fn test_hook_rewrites_enhanced_prompt() {
        let hooks = Arc::new(HookBus::new());
        hooks.register(
            HookPoint::AfterEnhance,
            "test:rewrite",
            0,
            Arc::new(|mut state: PipelineState| {
                state.enhanced = Some("OVERRIDDEN PROMPT".to_string());
                Ok(Some(state))
            }),
        );
        let mock = MockHtmlProvider::new(ProviderKind::Gemini).with_default(RICH_HTML);
        let fx = fixture_with(mock, false, hooks);

        let result = fx
            .pipeline
            .run(
                &intent("track my sleep"),
                &RunOptions::default(),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.enhanced_prompt, "OVERRIDDEN PROMPT");
    }

    #[tokio::test]
    async fn test_failing_hook_does_not_abort_run() {
        let hooks = Arc::new(HookBus::new());
        hooks.register(
            HookPoint::BeforeGenerate,
            "test:broken",
            0,
            Arc::new(|_| Err("hook exploded".to_string())),
        );
        let mock = MockHtmlProvider::new(ProviderKind::Gemini).with_default(RICH_HTML);
        let fx = fixture_with(mock, false, hooks);

        let result = fx
            .pipeline
            .run(
                &intent("track my sleep"),
                &RunOptions::default(),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.hook_errors.len(), 1);
        assert_eq!(result.hook_errors[0].error, "hook exploded");
    }

    #[tokio::test]
    async fn test_render_writes_output_file() {
        let mock = MockHtmlProvider::new(ProviderKind::Gemini).with_default(RICH_HTML);
        let fx = fixture(mock, false);

        let result = fx
            .pipeline
            .run(
                &intent("Track my cardio!"),
                &RunOptions {
                    render: true,
                    ..Default::default()
                },
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let path = result.output_path.unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("track-my-cardio-"));
        assert!(name.ends_with(".html"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), result.html);
    }

    #[tokio::test]
    async fn test_cancelled_run_still_fires_on_error_hooks() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let hooks = Arc::new(HookBus::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        hooks.register(
            HookPoint::OnError,
            "test:watcher",
            0,
            Arc::new(move |state: PipelineState| {
                fired_clone.fetch_add(1, Ordering::SeqCst);
                assert!(state.error.is_some());
                Ok(Some(state))
            }),
        );
        let mock = MockHtmlProvider::new(ProviderKind::Gemini).with_default(RICH_HTML);
        let fx = fixture_with(mock, false, hooks);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = fx
            .pipeline
            .run(&intent("track my sleep"), &RunOptions::default(), None, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        // Cancellation still skips the error broadcast.
        assert!(!fx
            .emitter
            .events()
            .iter()
            .any(|e| matches!(e, PipelineEvent::Error { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_persistence() {
        let mock = MockHtmlProvider::new(ProviderKind::Gemini).with_default(RICH_HTML);
        let fx = fixture(mock, false);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = fx
            .pipeline
            .run(&intent("track my sleep"), &RunOptions::default(), None, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(fx
            .history
            .list(&forge_store::HistoryFilter::default())
            .await
            .unwrap()
            .is_empty());
    }
}
