//! Identifier and naming helpers
//!
//! Stable hashing for enhanced prompts, short opaque run identifiers, and
//! the output-filename slug convention.

use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Maximum length of an output-filename slug.
const SLUG_MAX_LEN: usize = 40;

/// Length of the truncated hex prompt hash.
const PROMPT_HASH_LEN: usize = 16;

/// Lowercase the text, replace non-alphanumeric runs with `-`, strip
/// leading/trailing dashes, and truncate to 40 characters.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut last_dash = true; // suppress a leading dash

    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
        if slug.len() >= SLUG_MAX_LEN {
            break;
        }
    }

    slug.truncate(SLUG_MAX_LEN);
    slug.trim_matches('-').to_string()
}

/// Build the output filename `<slug>-<YYYY-MM-DD>.html` for an intent.
pub fn output_filename(intent_text: &str, date: NaiveDate) -> String {
    let slug = slugify(intent_text);
    if slug.is_empty() {
        format!("app-{}.html", date.format("%Y-%m-%d"))
    } else {
        format!("{}-{}.html", slug, date.format("%Y-%m-%d"))
    }
}

/// Stable hash of an enhanced prompt: SHA-256, hex, truncated to 16 chars.
pub fn prompt_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..PROMPT_HASH_LEN].to_string()
}

/// Short opaque identifier: the first 8 hex chars of a v4 UUID.
pub fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}
