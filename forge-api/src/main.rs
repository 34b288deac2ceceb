//! FORGE server entry point
//!
//! Loads layered configuration, applies pending migrations, wires the
//! pipeline and stores, and serves the HTTP/SSE API until ctrl-c.

use std::net::SocketAddr;
use std::sync::Arc;

use forge_api::sse::ProgressEmitter;
use forge_api::{create_api_router, AppState, AuthState, RateLimitState, SseChannel};
use forge_api::sse::SseChannelOptions;
use forge_core::ForgeConfig;
use forge_engine::{HookBus, Pipeline, PipelineDeps, PluginRegistry, ProbeSet, Validator};
use forge_llm::Router as LlmRouter;
use forge_store::{Cache, Grimoire, History, KvStore, Migrator, ProfileStore, Telemetry};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ForgeConfig::load(None)?;
    let data_dir = config.paths.data_dir.clone();

    // Migrations run before anything touches the stores.
    let migrator = Migrator::new(&data_dir);
    for applied in migrator.upgrade()? {
        tracing::info!(version = applied.version, result = %applied.result, "Migration applied");
    }

    let kv = Arc::new(KvStore::new(&data_dir));
    let history = Arc::new(History::new(kv.clone()));
    let grimoire = Arc::new(Grimoire::new(kv));
    let telemetry = Arc::new(Telemetry::new(&data_dir));
    let profile = Arc::new(ProfileStore::new(&data_dir));
    let cache = Arc::new(Cache::new(256));

    let router = Arc::new(LlmRouter::from_env());
    let validator = Arc::new(Validator::new());
    let hooks = Arc::new(HookBus::new());

    let plugins = PluginRegistry::new(hooks.clone(), &data_dir);
    for report in plugins.discover(&data_dir.join("plugins")) {
        match &report.error {
            Some(error) => tracing::warn!(plugin = %report.name, %error, "Plugin failed to load"),
            None => tracing::info!(plugin = %report.name, enabled = report.enabled, "Plugin loaded"),
        }
    }

    let progress = Arc::new(SseChannel::new(SseChannelOptions {
        max_clients: config.server.sse_max_clients,
        ..Default::default()
    }));

    let workspace = std::env::current_dir().ok();
    let pipeline = Arc::new(Pipeline::new(PipelineDeps {
        router: router.clone(),
        validator: validator.clone(),
        probes: ProbeSet::with_builtins(&cache, workspace),
        hooks,
        history: history.clone(),
        grimoire: grimoire.clone(),
        telemetry,
        profile,
        emitter: Arc::new(ProgressEmitter::new(progress.clone())),
        config: config.clone(),
    }));

    let state = AppState::new(
        Some(pipeline),
        router,
        validator,
        history,
        grimoire,
        progress,
    );
    let auth = AuthState::new(config.server.token.clone());
    let rate_limit = RateLimitState::new(
        config.server.rate_limit.max_requests,
        std::time::Duration::from_secs(config.server.rate_limit.window_secs),
    );
    let app = create_api_router(state, auth, rate_limit);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!(%addr, "Starting FORGE API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown signal received");
    })
    .await?;

    Ok(())
}
