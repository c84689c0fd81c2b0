//! Structured-output parsing with one bounded local repair pass.
//!
//! Models asked for JSON often wrap it in a Markdown fence, prepend a
//! sentence of chatter, or leave a trailing comma. The repair pass salvages
//! the first fenced block or the first balanced `{...}` / `[...]` fragment
//! and strips trailing commas. It runs once; it never calls the model again.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
static TRAILING_COMMA: OnceLock<Option<Regex>> = OnceLock::new();

fn fence() -> Option<&'static Regex> {
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").ok())
        .as_ref()
}

fn trailing_comma() -> Option<&'static Regex> {
    TRAILING_COMMA
        .get_or_init(|| Regex::new(r",(\s*[}\]])").ok())
        .as_ref()
}

/// Parses `text` as JSON, falling back to [`repair`].
///
/// Returns `(value, repaired)`, or the direct parse error message when the
/// repair pass also fails.
///
/// # Examples
///
/// ```
/// use aiwrite_tasks::gateway::repair::parse_structured;
///
/// let (value, repaired) = parse_structured(r#"{"ok": true}"#).unwrap();
/// assert_eq!(value["ok"], true);
/// assert!(!repaired);
///
/// let (value, repaired) = parse_structured("Sure!\n```json\n{\"ok\": true,}\n```").unwrap();
/// assert_eq!(value["ok"], true);
/// assert!(repaired);
///
/// assert!(parse_structured("no structure here").is_err());
/// ```
pub fn parse_structured(text: &str) -> Result<(Value, bool), String> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(value) => Ok((value, false)),
        Err(err) => repair(text).map(|v| (v, true)).ok_or_else(|| err.to_string()),
    }
}

/// Salvages a JSON value from free text.
pub fn repair(text: &str) -> Option<Value> {
    let mut candidates = Vec::new();
    if let Some(re) = fence() {
        candidates.extend(
            re.captures_iter(text)
                .filter_map(|c| c.get(1))
                .map(|m| m.as_str().to_string()),
        );
    }
    candidates.extend(balanced_fragment(text, '{', '}'));
    candidates.extend(balanced_fragment(text, '[', ']'));

    candidates.iter().find_map(|candidate| try_parse(candidate))
}

fn try_parse(candidate: &str) -> Option<Value> {
    let trimmed = candidate.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    let cleaned = trailing_comma()?.replace_all(trimmed, "$1");
    serde_json::from_str(&cleaned).ok()
}

/// First balanced `open ... close` fragment, honouring string literals.
fn balanced_fragment(text: &str, open: char, close: char) -> Option<String> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {},
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + ch.len_utf8();
                    return Some(text[start..end].to_string());
                }
            },
            _ => {},
        }
    }
    None
}
