//! Content sanitizer: turns raw assistant output into clean markup.
//!
//! Rules, applied until the text stops changing:
//! 1. Strip a leading and/or trailing code fence (with or without a language tag).
//! 2. If the text is a JSON object, take the first present field from the
//!    caller's ordered candidate list. Unparsable text is left alone.
//! 3. Replace em and en dashes with a plain hyphen.
//!
//! Sanitizing never fails. On any ambiguity the least-modified text wins;
//! callers treat an empty result as the only failure signal. Iterating to a
//! fixpoint makes `sanitize(sanitize(x)) == sanitize(x)` hold.
//!
//! Every rule only ever shortens the text (an unwrap that would not is
//! skipped), so each round either changes nothing or removes bytes and the
//! loop ends after at most `raw.len()` rounds.

use std::sync::LazyLock;

use regex::Regex;

/// Candidate fields for a drafted section.
pub const SECTION_KEYS: &[&str] = &["sectionHtml", "html", "content"];

/// Candidate fields for the cleanup pass over the assembled article.
pub const CLEANUP_KEYS: &[&str] = &["cleanHtml", "cleanHtmlSection", "html", "content"];

/// Candidate wrappers around the structured research payload.
pub const RESEARCH_KEYS: &[&str] = &["research", "result", "data"];

/// Candidate wrappers around the SEO package payload.
pub const SEO_KEYS: &[&str] = &["seo", "result", "data"];

static LEADING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^```[A-Za-z0-9_+.\-]*[ \t]*(?:\r?\n|$)").expect("valid regex"));

static TRAILING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\r?\n)?[ \t]*```$").expect("valid regex"));

/// Sanitize `raw`, unwrapping structured payloads via `keys` (first present wins).
pub fn sanitize(raw: &str, keys: &[&str]) -> String {
    let mut current = raw.to_string();
    loop {
        let next = sanitize_once(&current, keys);
        if next.len() >= current.len() {
            return current;
        }
        current = next;
    }
}

fn sanitize_once(text: &str, keys: &[&str]) -> String {
    let unfenced = strip_code_fence(text);
    // Re-serialized nested JSON can outgrow its source (`1E9` -> `1000000000.0`).
    let unwrapped = unwrap_structured(&unfenced, keys)
        .filter(|inner| inner.len() < unfenced.len())
        .unwrap_or(unfenced);
    normalize_dashes(&unwrapped)
}

/// Remove a leading and a trailing fence marker, trimming surrounding whitespace.
pub fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    let without_leading = LEADING_FENCE.replace(trimmed, "");
    let without_trailing = TRAILING_FENCE.replace(without_leading.as_ref(), "");
    without_trailing.trim().to_string()
}

/// Extract the first present candidate field from a JSON object.
///
/// Returns `None` when the text is not a JSON object or none of the keys
/// holds a usable value. String values are returned verbatim; nested objects
/// and arrays are returned as compact JSON.
pub fn unwrap_structured(text: &str, keys: &[&str]) -> Option<String> {
    let trimmed = text.trim();
    if !trimmed.starts_with('{') || keys.is_empty() {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(trimmed).ok()?;
    let object = value.as_object()?;
    keys.iter()
        .find_map(|key| match object.get(*key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            nested @ (serde_json::Value::Object(_) | serde_json::Value::Array(_)) => {
                serde_json::to_string(nested).ok()
            }
            _ => None,
        })
        .map(|s| s.trim().to_string())
}

/// Replace em dashes (U+2014) and en dashes (U+2013) with `-`.
pub fn normalize_dashes(text: &str) -> String {
    if !text.contains(['\u{2014}', '\u{2013}']) {
        return text.to_string();
    }
    text.replace(['\u{2014}', '\u{2013}'], "-")
}
