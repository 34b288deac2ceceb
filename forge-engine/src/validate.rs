//! The four-axis quality rubric
//!
//! `validate` is a pure function from HTML text to a [`Score`]. Each axis
//! sums weighted indicator checks and clamps to 1. The indicator set is
//! data: tests are one-method trait objects, replaceable without touching
//! the scoring arithmetic. Axis names, grade boundaries, and the [0, 1]
//! range are fixed.

use forge_core::Score;
use serde::{Deserialize, Serialize};

/// The four rubric axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    /// Agency and effect: can the user act, does state persist.
    Conatus,
    /// Structural adequacy: well-formed, scripted, non-trivial.
    Ratio,
    /// Beauty: styling, motion, responsiveness.
    Laetitia,
    /// Naturalness: semantics, accessibility, texture.
    Natura,
}

/// One replaceable indicator check.
pub trait IndicatorTest: Send + Sync {
    /// `haystack` is the full document lowercased once by the validator.
    fn matches(&self, haystack: &str) -> bool;
}

/// Matches when any needle occurs in the document.
pub struct ContainsAny(pub &'static [&'static str]);

impl IndicatorTest for ContainsAny {
    fn matches(&self, haystack: &str) -> bool {
        self.0.iter().any(|needle| haystack.contains(needle))
    }
}

/// Matches documents of at least this many characters.
pub struct MinLength(pub usize);

impl IndicatorTest for MinLength {
    fn matches(&self, haystack: &str) -> bool {
        haystack.len() >= self.0
    }
}

/// Matches documents containing any non-ASCII glyph.
pub struct HasGlyphs;

impl IndicatorTest for HasGlyphs {
    fn matches(&self, haystack: &str) -> bool {
        haystack.chars().any(|c| !c.is_ascii())
    }
}

/// A weighted check contributing to one axis.
pub struct Indicator {
    pub axis: Axis,
    pub weight: f64,
    pub name: &'static str,
    test: Box<dyn IndicatorTest>,
}

impl Indicator {
    pub fn new(
        axis: Axis,
        weight: f64,
        name: &'static str,
        test: impl IndicatorTest + 'static,
    ) -> Self {
        Self {
            axis,
            weight,
            name,
            test: Box::new(test),
        }
    }
}

/// The rubric evaluator.
pub struct Validator {
    indicators: Vec<Indicator>,
}

impl Validator {
    /// Validator with the default indicator set.
    pub fn new() -> Self {
        Self::with_indicators(default_indicators())
    }

    /// Validator over a custom indicator set.
    pub fn with_indicators(indicators: Vec<Indicator>) -> Self {
        Self { indicators }
    }

    /// Score a document. Pure: identical input yields identical output.
    pub fn validate(&self, html: &str) -> Score {
        let haystack = html.to_lowercase();
        let (mut conatus, mut ratio, mut laetitia, mut natura) = (0.0, 0.0, 0.0, 0.0);
        let mut issues = Vec::new();

        for indicator in &self.indicators {
            if indicator.test.matches(&haystack) {
                match indicator.axis {
                    Axis::Conatus => conatus += indicator.weight,
                    Axis::Ratio => ratio += indicator.weight,
                    Axis::Laetitia => laetitia += indicator.weight,
                    Axis::Natura => natura += indicator.weight,
                }
            } else {
                issues.push(format!("missing {}", indicator.name));
            }
        }

        Score::from_axes(conatus, ratio, laetitia, natura, issues)
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Validator")
            .field("indicators", &self.indicators.len())
            .finish()
    }
}

/// The default indicator set. Weights per axis sum slightly above 1 so a
/// document can miss one minor indicator and still max the axis.
pub fn default_indicators() -> Vec<Indicator> {
    vec![
        // Conatus: agency and effect
        Indicator::new(
            Axis::Conatus,
            0.30,
            "input elements",
            ContainsAny(&["<input", "<textarea", "<select", "<button"]),
        ),
        Indicator::new(
            Axis::Conatus,
            0.30,
            "event handlers",
            ContainsAny(&["addeventlistener", "onclick", "oninput", "onsubmit", "onchange"]),
        ),
        Indicator::new(
            Axis::Conatus,
            0.25,
            "persistent storage",
            ContainsAny(&["localstorage", "sessionstorage", "indexeddb"]),
        ),
        Indicator::new(
            Axis::Conatus,
            0.25,
            "canvas or visualization",
            ContainsAny(&["<canvas", "<svg", "chart"]),
        ),
        // Ratio: structural adequacy
        Indicator::new(Axis::Ratio, 0.25, "doctype", ContainsAny(&["<!doctype"])),
        Indicator::new(
            Axis::Ratio,
            0.20,
            "closing tags",
            ContainsAny(&["</html>"]),
        ),
        Indicator::new(Axis::Ratio, 0.25, "scripts", ContainsAny(&["<script"])),
        Indicator::new(
            Axis::Ratio,
            0.15,
            "error handling",
            ContainsAny(&["try", "catch", "onerror"]),
        ),
        Indicator::new(Axis::Ratio, 0.20, "non-trivial length", MinLength(2000)),
        // Laetitia: beauty
        Indicator::new(Axis::Laetitia, 0.25, "embedded styles", ContainsAny(&["<style"])),
        Indicator::new(
            Axis::Laetitia,
            0.20,
            "css custom properties",
            ContainsAny(&["var(--", ":root"]),
        ),
        Indicator::new(
            Axis::Laetitia,
            0.25,
            "transitions or animations",
            ContainsAny(&["transition", "animation", "@keyframes"]),
        ),
        Indicator::new(Axis::Laetitia, 0.15, "gradients", ContainsAny(&["gradient"])),
        Indicator::new(Axis::Laetitia, 0.15, "media queries", ContainsAny(&["@media"])),
        // Natura: naturalness and accessibility
        Indicator::new(
            Axis::Natura,
            0.30,
            "semantic elements",
            ContainsAny(&["<main", "<header", "<footer", "<section", "<nav", "<article"]),
        ),
        Indicator::new(
            Axis::Natura,
            0.25,
            "aria attributes",
            ContainsAny(&["aria-", "role="]),
        ),
        Indicator::new(
            Axis::Natura,
            0.15,
            "input placeholders",
            ContainsAny(&["placeholder="]),
        ),
        Indicator::new(Axis::Natura, 0.20, "page title", ContainsAny(&["<title"])),
        Indicator::new(Axis::Natura, 0.10, "glyphs", HasGlyphs),
    ]
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// A document hitting every default indicator.
    pub const RICH_HTML: &str = concat!(
        "<!DOCTYPE html><html lang=\"en\"><head><title>Cardio Log \u{2764}</title>",
        "<style>:root{--bg:#111;}body{background:linear-gradient(#111,#223);",
        "transition:all .3s;}@media(max-width:600px){body{font-size:14px}}</style>",
        "</head><body><header role=\"banner\"><h1>Cardio Log</h1></header>",
        "<main aria-label=\"log\"><section><input placeholder=\"minutes\">",
        "<button onclick=\"add()\">Add</button><canvas id=\"chart\"></canvas>",
        "</section></main><footer></footer><script>",
        "function add(){try{const v=document.querySelector('input').value;",
        "const log=JSON.parse(localStorage.getItem('log')||'[]');log.push(v);",
        "localStorage.setItem('log',JSON.stringify(log));}catch(e){console.error(e);}}",
        "document.addEventListener('keydown',()=>{});",
        // Padding so the length indicator trips.
        "//0123456789012345678901234567890123456789012345678901234567890123456789",
        "//0123456789012345678901234567890123456789012345678901234567890123456789",
        "//0123456789012345678901234567890123456789012345678901234567890123456789",
        "//0123456789012345678901234567890123456789012345678901234567890123456789",
        "//0123456789012345678901234567890123456789012345678901234567890123456789",
        "//0123456789012345678901234567890123456789012345678901234567890123456789",
        "//0123456789012345678901234567890123456789012345678901234567890123456789",
        "//0123456789012345678901234567890123456789012345678901234567890123456789",
        "//0123456789012345678901234567890123456789012345678901234567890123456789",
        "//0123456789012345678901234567890123456789012345678901234567890123456789",
        "//0123456789012345678901234567890123456789012345678901234567890123456789",
        "//0123456789012345678901234567890123456789012345678901234567890123456789",
        "//0123456789012345678901234567890123456789012345678901234567890123456789",
        "//0123456789012345678901234567890123456789012345678901234567890123456789",
        "//0123456789012345678901234567890123456789012345678901234567890123456789",
        "//0123456789012345678901234567890123456789012345678901234567890123456789",
        "//0123456789012345678901234567890123456789012345678901234567890123456789",
        "//0123456789012345678901234567890123456789012345678901234567890123456789",
        "//0123456789012345678901234567890123456789012345678901234567890123456789",
        "//0123456789012345678901234567890123456789012345678901234567890123456789",
        "//0123456789012345678901234567890123456789012345678901234567890123456789",
        "//0123456789012345678901234567890123456789012345678901234567890123456789",
        "</script></body></html>"
    );
}
