//! Post-processing of provider output
//!
//! Pure helpers: markdown fence stripping, the HTML-shape gate every
//! generation must pass, and token/cost estimation.

use forge_core::{ForgeResult, ProviderError};

/// Strip a leading and trailing triple-backtick fence (with optional
/// language tag) and trim surrounding whitespace. Applying this to already
/// clean output is a no-op.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let mut out = trimmed;

    if out.starts_with("```") {
        // Drop the fence line including any language tag.
        out = match out.find('\n') {
            Some(idx) => &out[idx + 1..],
            None => "",
        };
    }
    if let Some(stripped) = out.trim_end().strip_suffix("```") {
        out = stripped;
    }
    out.trim().to_string()
}

/// Validate that post-processed output is an HTML document: it must contain
/// `<!DOCTYPE` or `<html` (case-insensitive).
pub fn ensure_html(text: &str) -> ForgeResult<()> {
    let lower = text.to_lowercase();
    if lower.contains("<!doctype") || lower.contains("<html") {
        Ok(())
    } else {
        Err(ProviderError::MalformedOutput {
            reason: format!(
                "no <!DOCTYPE or <html marker in {} chars of output",
                text.len()
            ),
        }
        .into())
    }
}

/// Rough token estimate: four characters per token, rounded up.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64 + 3) / 4
}

/// Per-1k-token USD prices `(input, output)` for a resolved model. Local
/// models cost nothing; unknown remote models use a conservative default.
pub fn price_per_1k(model: &str) -> (f64, f64) {
    match model {
        m if m.starts_with("gemini-2.0-flash") => (0.000_10, 0.000_40),
        m if m.starts_with("gemini") => (0.000_30, 0.001_20),
        "gpt-4o-mini" => (0.000_15, 0.000_60),
        m if m.starts_with("gpt-4o") => (0.002_50, 0.010_00),
        m if m.starts_with("gpt") || m.starts_with("o") => (0.001_00, 0.004_00),
        m if m.starts_with("claude-haiku") || m.contains("haiku") => (0.000_80, 0.004_00),
        m if m.starts_with("claude") => (0.003_00, 0.015_00),
        // Ollama and anything else local
        _ => (0.0, 0.0),
    }
}

/// Estimated USD cost of one call.
pub fn estimate_cost(model: &str, tokens_in: u64, tokens_out: u64) -> f64 {
    let (input, output) = price_per_1k(model);
    (tokens_in as f64 / 1000.0) * input + (tokens_out as f64 / 1000.0) * output
}
