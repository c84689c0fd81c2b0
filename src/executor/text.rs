//! Text cleanup shared by the executors.

use std::sync::OnceLock;

use regex::Regex;

/// Characters kept from a chapter when summarising it for the next one.
pub const SUMMARY_CHARS: usize = 200;

fn latex_command_with_arg() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\\[a-zA-Z]+\{[^}]*\}").ok())
        .as_ref()
}

fn latex_command() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\\[a-zA-Z]+").ok()).as_ref()
}

/// Removes a surrounding Markdown code fence, if the model added one.
///
/// # Examples
///
/// ```
/// use aiwrite_tasks::executor::text::strip_code_fence;
///
/// assert_eq!(strip_code_fence("```latex\n\\section{A}\n```"), "\\section{A}");
/// assert_eq!(strip_code_fence("plain text"), "plain text");
/// ```
pub fn strip_code_fence(text: &str) -> String {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```") {
        // drop the info string (`latex`, `markdown`, ...)
        body = match rest.find('\n') {
            Some(newline) => &rest[newline + 1..],
            None => rest,
        };
    }
    if let Some(rest) = body.trim_end().strip_suffix("```") {
        body = rest;
    }
    body.trim().to_string()
}

/// Strips LaTeX commands and collapses whitespace.
///
/// # Examples
///
/// ```
/// use aiwrite_tasks::executor::text::strip_latex;
///
/// assert_eq!(strip_latex("\\textbf{Bold} claim\n\n\\par here"), "claim here");
/// ```
pub fn strip_latex(text: &str) -> String {
    let mut out = text.to_string();
    if let Some(re) = latex_command_with_arg() {
        out = re.replace_all(&out, "").into_owned();
    }
    if let Some(re) = latex_command() {
        out = re.replace_all(&out, "").into_owned();
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Short summary of a chapter used as continuity context for the next one.
///
/// Keeps the first [`SUMMARY_CHARS`] characters of the LaTeX-stripped text.
///
/// # Examples
///
/// ```
/// use aiwrite_tasks::executor::text::summarize;
///
/// let long = "word ".repeat(100);
/// let summary = summarize("Background", &long);
/// assert!(summary.starts_with("Background: word"));
/// assert!(summary.ends_with("..."));
/// ```
pub fn summarize(title: &str, text: &str) -> String {
    let plain = strip_latex(text);
    let mut chars = plain.chars();
    let head: String = chars.by_ref().take(SUMMARY_CHARS).collect();
    if chars.next().is_some() {
        format!("{title}: {head}...")
    } else {
        format!("{title}: {head}")
    }
}

/// Image media type from a file extension; PNG when unknown.
pub fn media_type_for(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "image/png",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fence_without_info_string() {
        assert_eq!(strip_code_fence("```\n| a | b |\n```\n"), "| a | b |");
    }

    #[test]
    fn trailing_fence_only() {
        assert_eq!(strip_code_fence("body text\n```"), "body text");
    }

    #[test]
    fn short_text_is_not_ellipsized() {
        assert_eq!(summarize("Intro", "\\cite{x}Short."), "Intro: Short.");
    }

    #[test]
    fn summary_counts_characters_not_bytes() {
        let text = "研".repeat(SUMMARY_CHARS + 5);
        let summary = summarize("绪论", &text);
        assert_eq!(summary.chars().filter(|c| *c == '研').count(), SUMMARY_CHARS);
    }

    #[test]
    fn media_types() {
        assert_eq!(media_type_for("figs/a.JPG"), "image/jpeg");
        assert_eq!(media_type_for("figs/a.webp"), "image/webp");
        assert_eq!(media_type_for("figs/a.gif"), "image/gif");
        assert_eq!(media_type_for("figs/noext"), "image/png");
    }
}
