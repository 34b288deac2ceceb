//! Value types flowing through the FORGE pipeline

use crate::error::{ForgeError, ForgeResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// INTENT
// ============================================================================

/// Built-in style presets for generated applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StylePreset {
    #[default]
    Cyberpunk,
    Minimal,
    Terminal,
}

impl StylePreset {
    /// Parse from a user-supplied preset name. Unknown names fall back to
    /// the default preset.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "minimal" => StylePreset::Minimal,
            "terminal" => StylePreset::Terminal,
            _ => StylePreset::Cyberpunk,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StylePreset::Cyberpunk => "cyberpunk",
            StylePreset::Minimal => "minimal",
            StylePreset::Terminal => "terminal",
        }
    }
}

/// Options accompanying an intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentOptions {
    /// Provider/model alias (e.g. "gemini", "gpt", "claude", "llama3.1").
    pub provider_alias: String,
    /// Visual style preset.
    pub style: StylePreset,
    /// Output language for UI copy.
    pub language: String,
    /// Best-of-N iteration count (1 = single shot).
    pub iterations: u32,
    /// Whether to enter the refinement loop after the first generation.
    pub refine: bool,
    /// Optional persona fragment injected into the enhanced prompt.
    pub persona: Option<String>,
    /// Optional theme hint (free text).
    pub theme: Option<String>,
}

impl Default for IntentOptions {
    fn default() -> Self {
        Self {
            provider_alias: "gemini".to_string(),
            style: StylePreset::default(),
            language: "en".to_string(),
            iterations: 1,
            refine: false,
            persona: None,
            theme: None,
        }
    }
}

/// Immutable user intent: the raw sentence plus options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub text: String,
    pub options: IntentOptions,
}

impl Intent {
    /// Create an intent, rejecting empty or whitespace-only text.
    pub fn new(text: impl Into<String>, options: IntentOptions) -> ForgeResult<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ForgeError::invalid_input("intent text is empty"));
        }
        Ok(Self { text, options })
    }

    /// Create an intent with default options.
    pub fn plain(text: impl Into<String>) -> ForgeResult<Self> {
        Self::new(text, IntentOptions::default())
    }
}

// ============================================================================
// SCORE / GRADE
// ============================================================================

/// Letter grade derived from the mean of the four axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    D,
    C,
    B,
    A,
    S,
}

impl Grade {
    /// The unique piecewise mapping from total score to grade.
    pub fn from_total(total: f64) -> Self {
        if total >= 0.85 {
            Grade::S
        } else if total >= 0.70 {
            Grade::A
        } else if total >= 0.55 {
            Grade::B
        } else if total >= 0.40 {
            Grade::C
        } else {
            Grade::D
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::S => "S",
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
        }
    }

    /// Parse a grade letter. Unknown letters parse as None.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "S" => Some(Grade::S),
            "A" => Some(Grade::A),
            "B" => Some(Grade::B),
            "C" => Some(Grade::C),
            "D" => Some(Grade::D),
            _ => None,
        }
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Four-axis quality rubric result.
///
/// Axes are clamped to [0, 1]; `total` is their mean; `grade` is the fixed
/// piecewise function of `total`. `issues` lists missed indicators in
/// declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub conatus: f64,
    pub ratio: f64,
    pub laetitia: f64,
    pub natura: f64,
    pub total: f64,
    pub grade: Grade,
    pub issues: Vec<String>,
}

impl Score {
    /// Build a score from raw axis sums, clamping each axis into [0, 1].
    pub fn from_axes(
        conatus: f64,
        ratio: f64,
        laetitia: f64,
        natura: f64,
        issues: Vec<String>,
    ) -> Self {
        let conatus = conatus.clamp(0.0, 1.0);
        let ratio = ratio.clamp(0.0, 1.0);
        let laetitia = laetitia.clamp(0.0, 1.0);
        let natura = natura.clamp(0.0, 1.0);
        let total = (conatus + ratio + laetitia + natura) / 4.0;

        Self {
            conatus,
            ratio,
            laetitia,
            natura,
            total,
            grade: Grade::from_total(total),
            issues,
        }
    }

    /// A zero score with a single explanatory issue. Used for failed
    /// candidates in iteration strategies.
    pub fn zero(issue: impl Into<String>) -> Self {
        Self::from_axes(0.0, 0.0, 0.0, 0.0, vec![issue.into()])
    }

    /// Axis values paired with their names, in canonical order.
    pub fn axes(&self) -> [(&'static str, f64); 4] {
        [
            ("conatus", self.conatus),
            ("ratio", self.ratio),
            ("laetitia", self.laetitia),
            ("natura", self.natura),
        ]
    }

    /// Names of the two weakest axes, lowest first.
    pub fn weakest_axes(&self) -> [&'static str; 2] {
        let mut axes = self.axes();
        axes.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        [axes[0].0, axes[1].0]
    }
}

// ============================================================================
// GENERATION
// ============================================================================

/// One provider round-trip: the generated HTML plus request metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub id: String,
    pub provider: String,
    pub model: String,
    pub prompt_hash: String,
    pub html: String,
    pub tokens_in_est: u64,
    pub tokens_out_est: u64,
    pub cost_est: f64,
    pub duration_ms: u64,
    pub at: DateTime<Utc>,
}

// ============================================================================
// PERSISTED RECORDS
// ============================================================================

/// Metadata record for one pipeline run. The HTML artifact is stored in a
/// separate collection keyed by the same `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub prompt: String,
    pub enhanced_prompt_hash: String,
    pub model: String,
    pub provider: String,
    pub score: Score,
    pub grade: Grade,
    pub code_length: usize,
    pub style: StylePreset,
    pub tags: Vec<String>,
    pub at: DateTime<Utc>,
}

/// A curated prompt in the grimoire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrimoireEntry {
    pub id: String,
    pub prompt: String,
    pub tags: Vec<String>,
    pub category: String,
    pub favorite: bool,
    /// Opaque quality score in [0, 1], clamped on write.
    pub score: Option<f64>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub used_count: u64,
}

/// One LLM call's usage record, aggregated into per-day rollups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub at: DateTime<Utc>,
    pub model: String,
    pub in_tokens: u64,
    pub out_tokens: u64,
    pub cost_est: f64,
    pub duration_ms: u64,
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_intent_rejected() {
        assert!(Intent::plain("").is_err());
        assert!(Intent::plain("   \n\t").is_err());
        assert!(Intent::plain("track my sleep").is_ok());
    }

    #[test]
    fn test_grade_boundaries() {
        assert_eq!(Grade::from_total(0.85), Grade::S);
        assert_eq!(Grade::from_total(0.849), Grade::A);
        assert_eq!(Grade::from_total(0.70), Grade::A);
        assert_eq!(Grade::from_total(0.699), Grade::B);
        assert_eq!(Grade::from_total(0.55), Grade::B);
        assert_eq!(Grade::from_total(0.40), Grade::C);
        assert_eq!(Grade::from_total(0.399), Grade::D);
        assert_eq!(Grade::from_total(0.0), Grade::D);
    }

    #[test]
    fn test_score_clamps_axes() {
        let score = Score::from_axes(1.5, -0.2, 0.5, 0.5, vec![]);
        assert_eq!(score.conatus, 1.0);
        assert_eq!(score.ratio, 0.0);
        assert_eq!(score.total, 0.5);
    }

    #[test]
    fn test_weakest_axes() {
        let score = Score::from_axes(0.9, 0.1, 0.5, 0.2, vec![]);
        assert_eq!(score.weakest_axes(), ["ratio", "natura"]);
    }

    #[test]
    fn test_style_preset_parse_fallback() {
        assert_eq!(StylePreset::parse("minimal"), StylePreset::Minimal);
        assert_eq!(StylePreset::parse("TERMINAL"), StylePreset::Terminal);
        assert_eq!(StylePreset::parse("vaporwave"), StylePreset::Cyberpunk);
    }

    #[test]
    fn test_grade_ordering() {
        assert!(Grade::S > Grade::A);
        assert!(Grade::A > Grade::B);
        assert!(Grade::D < Grade::C);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// For all raw axis values, the built score keeps every axis in
        /// [0, 1], total is exactly the mean, and the grade matches the
        /// piecewise function.
        #[test]
        fn prop_score_invariants(
            c in -2.0f64..3.0,
            r in -2.0f64..3.0,
            l in -2.0f64..3.0,
            n in -2.0f64..3.0,
        ) {
            let score = Score::from_axes(c, r, l, n, vec![]);
            for (_, v) in score.axes() {
                prop_assert!((0.0..=1.0).contains(&v));
            }
            let mean = (score.conatus + score.ratio + score.laetitia + score.natura) / 4.0;
            prop_assert!((score.total - mean).abs() < 1e-12);
            prop_assert_eq!(score.grade, Grade::from_total(score.total));
        }
    }
}
