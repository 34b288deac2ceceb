//! End-to-end router tests over an in-memory app with a mock provider.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use forge_api::sse::{ProgressEmitter, SseChannelOptions};
use forge_api::{create_api_router, AppState, AuthState, RateLimitState, SseChannel};
use forge_core::ForgeConfig;
use forge_engine::{
    HookBus, NullEmitter, Pipeline, PipelineDeps, ProbeSet, Validator,
};
use forge_llm::{MockHtmlProvider, ProviderKind, Router as LlmRouter};
use forge_store::{Cache, Grimoire, History, KvStore, ProfileStore, Telemetry};
use tempfile::TempDir;
use tower::ServiceExt;

/// A document that clears the S/A band under the default rubric.
const RICH_HTML: &str = concat!(
    "<!DOCTYPE html><html lang=\"en\"><head><title>App \u{2728}</title>",
    "<style>:root{--a:#0f0}body{background:linear-gradient(#000,#111);",
    "transition:all .2s}@media(max-width:600px){body{font-size:12px}}</style></head>",
    "<body><header role=\"banner\"></header><main aria-label=\"app\"><section>",
    "<input placeholder=\"value\"><button onclick=\"go()\">Go</button>",
    "<canvas></canvas></section></main><footer></footer>",
    "<script>function go(){try{localStorage.setItem('k','v')}catch(e){}}",
    "document.addEventListener('click',()=>{});",
    "/*AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
    "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
    "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
    "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
    "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
    "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
    "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
    "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
    "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
    "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
    "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
    "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
    "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
    "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA*/",
    "</script></body></html>"
);

struct TestApp {
    router: axum::Router,
    _dir: TempDir,
}

struct TestAppOptions {
    token: Option<String>,
    max_requests: u32,
    with_pipeline: bool,
    use_progress_emitter: bool,
}

impl Default for TestAppOptions {
    fn default() -> Self {
        Self {
            token: None,
            max_requests: 1000,
            with_pipeline: true,
            use_progress_emitter: false,
        }
    }
}

fn test_app(options: TestAppOptions) -> TestApp {
    let dir = TempDir::new().unwrap();
    let mut config = ForgeConfig::default();
    config.paths.data_dir = dir.path().to_path_buf();
    config.paths.output_dir = dir.path().join("out");
    config.security.sanitize = false;

    let kv = Arc::new(KvStore::new(dir.path()));
    let history = Arc::new(History::new(kv.clone()));
    let grimoire = Arc::new(Grimoire::new(kv));
    let cache = Arc::new(Cache::new(16));
    let validator = Arc::new(Validator::new());
    let mock = MockHtmlProvider::new(ProviderKind::Gemini).with_default(RICH_HTML);
    let llm = Arc::new(LlmRouter::empty().with_provider(Arc::new(mock)));
    let progress = Arc::new(SseChannel::new(SseChannelOptions {
        heartbeat: Duration::from_secs(15),
        max_clients: 2,
    }));

    let pipeline = options.with_pipeline.then(|| {
        let emitter: Arc<dyn forge_engine::EventEmitter> = if options.use_progress_emitter {
            Arc::new(ProgressEmitter::new(progress.clone()))
        } else {
            Arc::new(NullEmitter)
        };
        Arc::new(Pipeline::new(PipelineDeps {
            router: llm.clone(),
            validator: validator.clone(),
            probes: ProbeSet::new(&cache),
            hooks: Arc::new(HookBus::new()),
            history: history.clone(),
            grimoire: grimoire.clone(),
            telemetry: Arc::new(Telemetry::new(dir.path())),
            profile: Arc::new(ProfileStore::new(dir.path())),
            emitter,
            config: config.clone(),
        }))
    });

    let state = AppState::new(pipeline, llm, validator, history, grimoire, progress);
    let auth = AuthState::new(options.token);
    let rate_limit = RateLimitState::new(options.max_requests, Duration::from_secs(60));
    TestApp {
        router: create_api_router(state, auth, rate_limit),
        _dir: dir,
    }
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}

fn get(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

fn post_json(path: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// ----------------------------------------------------------------------
// health / models / auth
// ----------------------------------------------------------------------

#[tokio::test]
async fn health_is_always_open() {
    let app = test_app(TestAppOptions {
        token: Some("secret".to_string()),
        ..Default::default()
    });
    let (status, body) = send(&app.router, get("/api/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn models_requires_token_when_configured() {
    let app = test_app(TestAppOptions {
        token: Some("secret".to_string()),
        ..Default::default()
    });

    let (status, _) = send(&app.router, get("/api/models")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let authed = Request::builder()
        .uri("/api/models")
        .header(header::AUTHORIZATION, "Bearer secret")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app.router, authed).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["models"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn wrong_token_is_rejected() {
    let app = test_app(TestAppOptions {
        token: Some("secret".to_string()),
        ..Default::default()
    });
    let request = Request::builder()
        .uri("/api/models")
        .header(header::AUTHORIZATION, "Bearer wrong")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn no_token_configured_means_open_access() {
    let app = test_app(TestAppOptions::default());
    let (status, _) = send(&app.router, get("/api/models")).await;
    assert_eq!(status, StatusCode::OK);
}

// ----------------------------------------------------------------------
// rate limiting
// ----------------------------------------------------------------------

#[tokio::test]
async fn rate_limit_sequence_is_200_200_429() {
    let app = test_app(TestAppOptions {
        max_requests: 2,
        ..Default::default()
    });

    let (first, _) = send(&app.router, get("/api/health")).await;
    let (second, _) = send(&app.router, get("/api/health")).await;
    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::OK);

    let (third, body) = send(&app.router, get("/api/health")).await;
    assert_eq!(third, StatusCode::TOO_MANY_REQUESTS);
    assert!(body["details"]["retryAfterMs"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn rate_limit_remaining_header_always_set() {
    let app = test_app(TestAppOptions {
        max_requests: 5,
        ..Default::default()
    });
    let response = app.router.clone().oneshot(get("/api/health")).await.unwrap();
    let remaining = response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|h| h.to_str().ok())
        .unwrap()
        .to_string();
    assert_eq!(remaining, "4");
}

// ----------------------------------------------------------------------
// CORS
// ----------------------------------------------------------------------

#[tokio::test]
async fn preflight_returns_204_with_allow_headers() {
    let app = test_app(TestAppOptions::default());
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/generate")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "*"
    );
}

// ----------------------------------------------------------------------
// generate / validate
// ----------------------------------------------------------------------

#[tokio::test]
async fn generate_returns_scored_html_and_persists() {
    let app = test_app(TestAppOptions::default());
    let (status, body) = send(
        &app.router,
        post_json("/api/generate", serde_json::json!({"prompt": "track my sleep"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["html"].as_str().unwrap().contains("<!DOCTYPE"));
    assert!(body["score"].as_f64().unwrap() >= 0.70);
    assert!(matches!(body["grade"].as_str().unwrap(), "S" | "A"));
    assert!(body["durationMs"].is_u64());
    assert!(!body["enhancedPrompt"].as_str().unwrap().is_empty());

    // The run landed in history and is retrievable by id.
    let id = body["historyId"].as_str().unwrap().to_string();
    let (status, detail) = send(&app.router, get(&format!("/api/history/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["prompt"], "track my sleep");
    assert!(detail["html"].as_str().unwrap().contains("<!DOCTYPE"));
}

#[tokio::test]
async fn generate_empty_prompt_is_bad_request() {
    let app = test_app(TestAppOptions::default());
    let (status, _) = send(
        &app.router,
        post_json("/api/generate", serde_json::json!({"prompt": "  "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn generate_without_pipeline_is_not_implemented() {
    let app = test_app(TestAppOptions {
        with_pipeline: false,
        ..Default::default()
    });
    let (status, _) = send(
        &app.router,
        post_json("/api/generate", serde_json::json!({"prompt": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn validate_scores_supplied_html() {
    let app = test_app(TestAppOptions::default());
    let (status, body) = send(
        &app.router,
        post_json("/api/validate", serde_json::json!({"html": "<html></html>"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let total = body["total"].as_f64().unwrap();
    assert!(total < 0.55, "bare html must land in the C/D band, got {}", total);
}

// ----------------------------------------------------------------------
// grimoire / history
// ----------------------------------------------------------------------

#[tokio::test]
async fn grimoire_save_then_fetch_round_trips() {
    let app = test_app(TestAppOptions::default());
    let (status, saved) = send(
        &app.router,
        post_json(
            "/api/grimoire",
            serde_json::json!({"prompt": "a pomodoro timer", "tags": ["focus"]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = saved["id"].as_str().unwrap().to_string();

    let (status, fetched) = send(&app.router, get(&format!("/api/grimoire/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["prompt"], "a pomodoro timer");

    let (status, listed) = send(&app.router, get("/api/grimoire?q=pomodoro")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn grimoire_unknown_id_is_404() {
    let app = test_app(TestAppOptions::default());
    let (status, _) = send(&app.router, get("/api/grimoire/doesnotexist")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn history_list_respects_limit() {
    let app = test_app(TestAppOptions::default());
    for prompt in ["one app", "two app", "three app"] {
        let (status, _) = send(
            &app.router,
            post_json("/api/generate", serde_json::json!({ "prompt": prompt })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, listed) = send(&app.router, get("/api/history?limit=2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn unknown_route_is_404() {
    let app = test_app(TestAppOptions::default());
    let (status, _) = send(&app.router, get("/api/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
