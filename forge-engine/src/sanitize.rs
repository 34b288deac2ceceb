//! Static security scan and best-effort sanitization
//!
//! A textual filter, not a parser: it catches the obvious dangerous
//! patterns in generated HTML and can strip them. Idempotent on its own
//! output. Issues are reported severity-first.

use serde::{Deserialize, Serialize};

/// Issue severity, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Rank for ordering: lower ranks sort first.
    fn rank(&self) -> u8 {
        match self {
            Severity::Critical => 0,
            Severity::High => 1,
            Severity::Medium => 2,
            Severity::Low => 3,
        }
    }
}

/// One finding from [`scan`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanIssue {
    pub name: String,
    pub severity: Severity,
    /// The matched text, truncated for readability.
    pub matched: String,
    /// 1-based line of the match.
    pub line: usize,
}

/// Scan result. `safe` is true iff no issue is high or critical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub safe: bool,
    pub issues: Vec<ScanIssue>,
}

/// Options for [`sanitize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SanitizeOptions {
    /// Also strip `<script>` blocks entirely.
    pub strip_scripts: bool,
    /// Also strip inline `style="..."` attributes.
    pub strip_inline_styles: bool,
}

/// Sanitization result: the rewritten code and what was removed.
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizeOutcome {
    pub code: String,
    pub removed: Vec<String>,
}

/// Scan patterns as `(name, severity, needle)`, checked per line.
const PATTERNS: &[(&str, Severity, &str)] = &[
    ("eval in markup", Severity::Critical, "eval("),
    ("javascript uri", Severity::High, "javascript:"),
    ("iframe embed", Severity::High, "<iframe"),
    ("document.write", Severity::Medium, "document.write"),
    ("outer html assignment", Severity::Medium, "outerhtml"),
    ("inline style attribute", Severity::Low, " style=\""),
];

/// Scan code for dangerous patterns. Issues come back severity-ranked.
pub fn scan(code: &str) -> ScanReport {
    let mut issues = Vec::new();
    for (line_idx, line) in code.lines().enumerate() {
        let lower = line.to_lowercase();
        for (name, severity, needle) in PATTERNS {
            if let Some(pos) = lower.find(needle) {
                let matched: String = lower[pos..].chars().take(60).collect();
                issues.push(ScanIssue {
                    name: name.to_string(),
                    severity: *severity,
                    matched,
                    line: line_idx + 1,
                });
            }
        }
    }
    issues.sort_by_key(|issue| issue.severity.rank());
    let safe = !issues
        .iter()
        .any(|i| matches!(i.severity, Severity::Critical | Severity::High));
    ScanReport { safe, issues }
}

/// Rewrite dangerous constructs. Always applied: `javascript:` URIs become
/// `#`, `eval(...)` is stripped from inline event handlers, `<iframe>`
/// blocks are removed. Optional: script blocks, inline style attributes.
pub fn sanitize(code: &str, options: SanitizeOptions) -> SanitizeOutcome {
    let mut removed = Vec::new();
    let mut code = code.to_string();

    if code.to_lowercase().contains("javascript:") {
        code = replace_case_insensitive(&code, "javascript:", "#");
        removed.push("javascript: uri".to_string());
    }

    let stripped = strip_eval_in_handlers(&code);
    if stripped != code {
        code = stripped;
        removed.push("eval in event handler".to_string());
    }

    let (without_iframes, iframe_count) = strip_blocks(&code, "<iframe", "</iframe>");
    if iframe_count > 0 {
        code = without_iframes;
        removed.push(format!("{} iframe block(s)", iframe_count));
    }

    if options.strip_scripts {
        let (without_scripts, script_count) = strip_blocks(&code, "<script", "</script>");
        if script_count > 0 {
            code = without_scripts;
            removed.push(format!("{} script block(s)", script_count));
        }
    }

    if options.strip_inline_styles {
        let stripped = strip_inline_styles(&code);
        if stripped != code {
            code = stripped;
            removed.push("inline style attributes".to_string());
        }
    }

    SanitizeOutcome { code, removed }
}

// ----------------------------------------------------------------------
// rewrite helpers
// ----------------------------------------------------------------------

/// ASCII-case-insensitive substring search over the original text. Needles
/// are ASCII, so every match index is a char boundary.
fn find_ascii_ci(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let haystack = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.is_empty() || haystack.len() < from + needle.len() {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&i| {
        haystack[i..i + needle.len()]
            .iter()
            .zip(needle)
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
    })
}

fn replace_case_insensitive(text: &str, needle: &str, replacement: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    while let Some(pos) = find_ascii_ci(text, needle, cursor) {
        out.push_str(&text[cursor..pos]);
        out.push_str(replacement);
        cursor = pos + needle.len();
    }
    out.push_str(&text[cursor..]);
    out
}

/// Remove `eval(...)` calls that appear inside `on*="..."` attributes,
/// up to the first closing parenthesis.
fn strip_eval_in_handlers(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;

    while let Some(start) = find_ascii_ci(text, "eval(", cursor) {
        // Only treat it as an inline handler when an on*=" attribute opens
        // between the previous tag start and the match.
        let context = &text[..start];
        let in_handler = context
            .rfind('<')
            .map(|tag_start| {
                let tail = context[tag_start..].to_ascii_lowercase();
                tail.contains(" on") && tail.contains("=\"") && !tail.contains('>')
            })
            .unwrap_or(false);

        if !in_handler {
            out.push_str(&text[cursor..start + 5]);
            cursor = start + 5;
            continue;
        }

        let close = text[start..]
            .find(')')
            .map(|p| start + p + 1)
            .unwrap_or(text.len());
        out.push_str(&text[cursor..start]);
        cursor = close;
    }
    out.push_str(&text[cursor..]);
    out
}

/// Remove every block from `open_tag` through `close_tag` (or a
/// self-terminating `/>`), returning the rewritten text and block count.
fn strip_blocks(text: &str, open_tag: &str, close_tag: &str) -> (String, usize) {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    let mut count = 0;

    while let Some(start) = find_ascii_ci(text, open_tag, cursor) {
        out.push_str(&text[cursor..start]);
        let end = match find_ascii_ci(text, close_tag, start) {
            Some(p) => p + close_tag.len(),
            None => match text[start..].find("/>") {
                Some(p) => start + p + 2,
                None => text.len(),
            },
        };
        cursor = end;
        count += 1;
    }
    out.push_str(&text[cursor..]);
    (out, count)
}

fn strip_inline_styles(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;

    while let Some(start) = find_ascii_ci(text, " style=\"", cursor) {
        let value_start = start + " style=\"".len();
        let end = text[value_start..]
            .find('"')
            .map(|p| value_start + p + 1)
            .unwrap_or(text.len());
        out.push_str(&text[cursor..start]);
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_flags_severities() {
        let report = scan("<a href=\"javascript:alert(1)\">x</a>\n<iframe src=\"x\"></iframe>");
        assert!(!report.safe);
        let names: Vec<&str> = report.issues.iter().map(|i| i.name.as_str()).collect();
        assert!(names.contains(&"javascript uri"));
        assert!(names.contains(&"iframe embed"));
    }

    #[test]
    fn test_scan_orders_by_severity() {
        let code = "document.write('x')\n<div onclick=\"eval(code)\">\n";
        let report = scan(code);
        assert_eq!(report.issues[0].severity, Severity::Critical);
        let ranks: Vec<u8> = report.issues.iter().map(|i| i.severity.rank()).collect();
        let mut sorted = ranks.clone();
        sorted.sort();
        assert_eq!(ranks, sorted);
    }

    #[test]
    fn test_scan_clean_code_is_safe() {
        let report = scan("<html><body><p>hello</p></body></html>");
        assert!(report.safe);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_scan_medium_only_is_safe() {
        let report = scan("<script>document.write('x')</script>");
        assert!(report.safe);
        assert_eq!(report.issues.len(), 1);
    }

    #[test]
    fn test_scan_reports_line_numbers() {
        let report = scan("ok\nok\n<iframe></iframe>");
        assert_eq!(report.issues[0].line, 3);
    }

    #[test]
    fn test_sanitize_replaces_javascript_uri() {
        let outcome = sanitize(
            "<a href=\"javascript:alert(1)\">x</a>",
            SanitizeOptions::default(),
        );
        assert_eq!(outcome.code, "<a href=\"#alert(1)\">x</a>");
        assert!(!outcome.removed.is_empty());
    }

    #[test]
    fn test_sanitize_strips_iframes() {
        let outcome = sanitize(
            "before<iframe src=\"evil\">inner</iframe>after",
            SanitizeOptions::default(),
        );
        assert_eq!(outcome.code, "beforeafter");
    }

    #[test]
    fn test_sanitize_strips_eval_only_in_handlers() {
        let outcome = sanitize(
            "<div onclick=\"eval(payload)\">x</div><script>eval(ok)</script>",
            SanitizeOptions::default(),
        );
        assert!(!outcome.code.contains("onclick=\"eval"));
        // eval inside script bodies is scanner business, not the rewriter's.
        assert!(outcome.code.contains("<script>eval(ok)</script>"));
    }

    #[test]
    fn test_sanitize_optional_script_stripping() {
        let options = SanitizeOptions {
            strip_scripts: true,
            ..Default::default()
        };
        let outcome = sanitize("<p>x</p><script>alert(1)</script>", options);
        assert_eq!(outcome.code, "<p>x</p>");
    }

    #[test]
    fn test_sanitize_optional_inline_style_stripping() {
        let options = SanitizeOptions {
            strip_inline_styles: true,
            ..Default::default()
        };
        let outcome = sanitize("<div style=\"color:red\" id=\"a\">x</div>", options);
        assert_eq!(outcome.code, "<div id=\"a\">x</div>");
    }

    #[test]
    fn test_sanitize_idempotent() {
        let dirty = "<a href=\"javascript:x()\">l</a><iframe>i</iframe><div onclick=\"eval(p)\">d</div>";
        let once = sanitize(dirty, SanitizeOptions::default());
        let twice = sanitize(&once.code, SanitizeOptions::default());
        assert_eq!(once.code, twice.code);
        assert!(twice.removed.is_empty());
    }

    #[test]
    fn test_sanitize_clean_input_untouched() {
        let clean = "<html><body>fine</body></html>";
        let outcome = sanitize(clean, SanitizeOptions::default());
        assert_eq!(outcome.code, clean);
        assert!(outcome.removed.is_empty());
    }
}
