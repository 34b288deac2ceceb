//! Deterministic prompt assembly
//!
//! `enhance` turns an intent plus ambient context into the structured
//! prompt the router sends; `build_system_instruction` produces the
//! provider-agnostic system prompt. Both are pure string builders: no
//! network, no filesystem, no environment.

use forge_core::StylePreset;

/// Everything the enhancer folds into the prompt besides the intent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnhanceContext {
    pub style: StylePreset,
    pub language: String,
    /// Joined probe hints, possibly empty.
    pub context_block: String,
    /// From the user profile, possibly absent.
    pub profile_hint: Option<String>,
    pub persona: Option<String>,
    pub theme: Option<String>,
}

/// Style-specific design guidance appended to the prompt.
fn style_fragment(style: StylePreset) -> &'static str {
    match style {
        StylePreset::Cyberpunk => {
            "Visual direction: neon-on-dark cyberpunk. Deep background, high-contrast \
             accent colors, glowing focus states, monospaced numerals."
        }
        StylePreset::Minimal => {
            "Visual direction: minimal. Generous whitespace, restrained palette, one \
             accent color, no ornament that does not carry information."
        }
        StylePreset::Terminal => {
            "Visual direction: terminal. Monospaced type, phosphor-green on near-black, \
             boxed sections, blinking cursor accents."
        }
    }
}

/// Build the enhanced prompt. Deterministic: identical inputs produce
/// identical output.
pub fn enhance(intent_text: &str, ctx: &EnhanceContext) -> String {
    let mut prompt = String::with_capacity(intent_text.len() + 512);

    prompt.push_str("Build a complete, self-contained HTML application for this request:\n");
    prompt.push_str(intent_text.trim());
    prompt.push('\n');

    if let Some(persona) = ctx.persona.as_deref().filter(|p| !p.trim().is_empty()) {
        prompt.push_str("\nAudience persona: ");
        prompt.push_str(persona.trim());
        prompt.push('\n');
    }

    prompt.push('\n');
    prompt.push_str(style_fragment(ctx.style));
    prompt.push('\n');

    if let Some(theme) = ctx.theme.as_deref().filter(|t| !t.trim().is_empty()) {
        prompt.push_str("Theme accent: ");
        prompt.push_str(theme.trim());
        prompt.push('\n');
    }

    if !ctx.language.is_empty() && ctx.language != "en" {
        prompt.push_str("All user-facing copy in language: ");
        prompt.push_str(&ctx.language);
        prompt.push('\n');
    }

    if !ctx.context_block.trim().is_empty() {
        prompt.push_str("\nAmbient context (use when it makes the app feel situated):\n");
        prompt.push_str(ctx.context_block.trim());
        prompt.push('\n');
    }

    if let Some(hint) = ctx.profile_hint.as_deref().filter(|h| !h.trim().is_empty()) {
        prompt.push_str("\nUser preference: ");
        prompt.push_str(hint.trim());
        prompt.push('\n');
    }

    prompt
}

/// Build the system instruction enforcing the output contract.
pub fn build_system_instruction(style: StylePreset, language: &str) -> String {
    let mut out = String::with_capacity(768);
    out.push_str(
        "You are an expert front-end engineer generating one complete HTML file.\n\
         Rules:\n\
         - Output ONLY the HTML document. No markdown fences, no commentary.\n\
         - Start with <!DOCTYPE html>. End with </html>.\n\
         - The file is fully self-contained: inline CSS and JS, no external \
           dependencies, no CDN links, no network calls.\n\
         - Persist user data with localStorage so state survives reloads.\n\
         - Quality bar: interactive controls with working handlers; sound \
           structure with error handling; polished styling with transitions \
           and a responsive layout; semantic elements with ARIA labels and \
           placeholders.\n",
    );
    out.push_str("- Style preset: ");
    out.push_str(style.as_str());
    out.push_str(".\n");
    if !language.is_empty() && language != "en" {
        out.push_str("- UI copy language: ");
        out.push_str(language);
        out.push_str(".\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> EnhanceContext {
        EnhanceContext {
            style: StylePreset::Minimal,
            language: "en".to_string(),
            context_block: "Rainy evening".to_string(),
            profile_hint: Some("prefers charts".to_string()),
            persona: Some("a runner".to_string()),
            theme: None,
        }
    }

    #[test]
    fn test_enhance_is_deterministic() {
        let a = enhance("track my cardio", &ctx());
        let b = enhance("track my cardio", &ctx());
        assert_eq!(a, b);
    }

    #[test]
    fn test_enhance_contains_all_sections() {
        let prompt = enhance("track my cardio", &ctx());
        assert!(prompt.contains("track my cardio"));
        assert!(prompt.contains("a runner"));
        assert!(prompt.contains("minimal"));
        assert!(prompt.contains("Rainy evening"));
        assert!(prompt.contains("prefers charts"));
    }

    #[test]
    fn test_enhance_omits_empty_sections() {
        let prompt = enhance("x", &EnhanceContext::default());
        assert!(!prompt.contains("Ambient context"));
        assert!(!prompt.contains("Audience persona"));
        assert!(!prompt.contains("User preference"));
    }

    #[test]
    fn test_enhance_varies_with_style() {
        let mut a = ctx();
        a.style = StylePreset::Cyberpunk;
        let mut b = ctx();
        b.style = StylePreset::Terminal;
        assert_ne!(enhance("x", &a), enhance("x", &b));
    }

    #[test]
    fn test_non_english_language_mentioned() {
        let mut c = ctx();
        c.language = "de".to_string();
        assert!(enhance("x", &c).contains("language: de"));
        assert!(build_system_instruction(StylePreset::Minimal, "de").contains("de"));
    }

    #[test]
    fn test_system_instruction_enforces_contract() {
        let system = build_system_instruction(StylePreset::Cyberpunk, "en");
        assert!(system.contains("ONLY the HTML"));
        assert!(system.contains("<!DOCTYPE html>"));
        assert!(system.contains("localStorage"));
        assert!(system.contains("self-contained"));
        assert!(system.contains("cyberpunk"));
    }
}
