//! The generation endpoint

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::{extract::State, Json};
use forge_core::{Intent, IntentOptions, Score, StylePreset};
use forge_engine::{IterationRecord, RunOptions};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerateBody {
    pub prompt: String,
    pub model: Option<String>,
    pub style: Option<String>,
    pub language: Option<String>,
    pub iterations: Option<u32>,
    pub refine: bool,
    pub persona: Option<String>,
    pub theme: Option<String>,
    pub inscribe: bool,
    pub render: bool,
}

impl Default for GenerateBody {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            model: None,
            style: None,
            language: None,
            iterations: None,
            refine: false,
            persona: None,
            theme: None,
            inscribe: false,
            render: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub html: String,
    pub score: f64,
    pub grade: String,
    pub validation: Score,
    pub model: String,
    pub provider: String,
    pub iterations: Vec<IterationRecord>,
    pub duration_ms: u64,
    pub enhanced_prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_id: Option<String>,
}

/// POST /api/generate
pub async fn generate(
    State(state): State<AppState>,
    Json(body): Json<GenerateBody>,
) -> ApiResult<Json<GenerateResponse>> {
    let Some(pipeline) = &state.pipeline else {
        return Err(ApiError::not_configured("generation pipeline"));
    };

    let defaults = IntentOptions::default();
    let options = IntentOptions {
        provider_alias: body.model.unwrap_or(defaults.provider_alias),
        style: body
            .style
            .as_deref()
            .map(StylePreset::parse)
            .unwrap_or(defaults.style),
        language: body.language.unwrap_or(defaults.language),
        iterations: body.iterations.unwrap_or(defaults.iterations),
        refine: body.refine,
        persona: body.persona,
        theme: body.theme,
    };
    let intent = Intent::new(body.prompt, options).map_err(ApiError::from)?;

    let run_options = RunOptions {
        inscribe: body.inscribe,
        render: body.render,
    };
    let result = pipeline
        .run(&intent, &run_options, None, &CancellationToken::new())
        .await
        .map_err(ApiError::from)?;

    Ok(Json(GenerateResponse {
        html: result.html,
        score: result.score.total,
        grade: result.grade.as_str().to_string(),
        validation: result.score,
        model: result.model,
        provider: result.provider,
        iterations: result.iterations,
        duration_ms: result.duration_ms,
        enhanced_prompt: result.enhanced_prompt,
        history_id: result.history_id,
    }))
}
