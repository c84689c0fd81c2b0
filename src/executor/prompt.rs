//! Request builders for each generation step.
//!
//! Prompt wording is deliberately plain; the orchestration layer only
//! relies on the outline response being JSON.

use crate::domain::{Document, Figure, Section, Table};
use crate::gateway::{ImagePayload, LlmOptions, ModelRequest};

const ACADEMIC_SYSTEM: &str =
    "You are an experienced academic writer. Write rigorous, well-structured prose.";

fn doc_header(document: &Document) -> String {
    let mut header = format!("Title: {}\nLanguage: {}\n", document.title, document.language);
    if let Some(style) = &document.style {
        header.push_str(&format!("Style: {style}\n"));
    }
    if !document.keywords.is_empty() {
        header.push_str(&format!("Keywords: {}\n", document.keywords.join(", ")));
    }
    header
}

/// Outline request: one JSON object listing subsections per chapter.
pub fn outline(document: &Document, options: LlmOptions) -> ModelRequest {
    let chapters = document
        .chapters()
        .filter(|c| !c.is_special())
        .map(|c| {
            let target = c
                .target_words
                .map(|t| format!(" (~{t} chars)"))
                .unwrap_or_default();
            format!("- {}: {}{}", c.id, c.title, target)
        })
        .collect::<Vec<_>>()
        .join("\n");

    let prompt = format!(
        "{}\nChapters:\n{}\n\n\
         Propose subsections for every chapter. Reply with JSON only:\n\
         {{\"sections\": [{{\"id\": \"<chapter id>\", \"children\": \
         [{{\"id\": \"<chapter id>.<n>\", \"title\": \"...\", \"target_words\": 500, \"notes\": \"...\"}}]}}]}}",
        doc_header(document),
        chapters
    );
    ModelRequest::text(prompt, options).with_system(ACADEMIC_SYSTEM)
}

/// Chapter draft request.
pub fn draft(
    document: &Document,
    section: &Section,
    previous_summary: Option<&str>,
    target_words: u32,
    options: LlmOptions,
) -> ModelRequest {
    let mut prompt = format!(
        "{}\nWrite the chapter \"{}\" in LaTeX body markup, about {} characters.\n",
        doc_header(document),
        section.title,
        target_words
    );
    if let Some(notes) = &section.notes {
        prompt.push_str(&format!("Notes: {notes}\n"));
    }
    if !section.children.is_empty() {
        prompt.push_str("Subsections:\n");
        for child in &section.children {
            prompt.push_str(&format!("- {}\n", child.title));
        }
    }
    if let Some(summary) = previous_summary {
        prompt.push_str(&format!("Previous chapter: {summary}\n"));
    }
    ModelRequest::text(prompt, options).with_system(ACADEMIC_SYSTEM)
}

/// Polishing request for an existing draft.
pub fn refine(document: &Document, section: &Section, draft: &str, options: LlmOptions) -> ModelRequest {
    let prompt = format!(
        "{}\nPolish the chapter \"{}\". Keep its structure and citations, fix \
         wording and flow, and return only the revised LaTeX body.\n\n{}",
        doc_header(document),
        section.title,
        draft
    );
    ModelRequest::text(prompt, options).with_system(ACADEMIC_SYSTEM)
}

/// Chinese abstract request over the full body.
pub fn abstract_cn(document: &Document, body: &str, options: LlmOptions) -> ModelRequest {
    let prompt = format!(
        "{}\nWrite a Chinese abstract (300-500 characters) covering purpose, \
         method, results and conclusion for the paper below.\n\n{}",
        doc_header(document),
        body
    );
    ModelRequest::text(prompt, options).with_system(ACADEMIC_SYSTEM)
}

/// English abstract request derived from the Chinese one.
pub fn abstract_en(document: &Document, abstract_cn: &str, options: LlmOptions) -> ModelRequest {
    let prompt = format!(
        "Translate and adapt this abstract of \"{}\" into fluent academic \
         English.\n\n{}",
        document.title, abstract_cn
    );
    ModelRequest::text(prompt, options).with_system(ACADEMIC_SYSTEM)
}

/// Vision request describing one figure.
pub fn image(
    document: &Document,
    section: &Section,
    figure: &Figure,
    image: ImagePayload,
    options: LlmOptions,
) -> ModelRequest {
    let prompt = format!(
        "Paper: {}\nSection: {}\nFigure caption: {}\n\n\
         Describe what the figure shows and the key finding it supports, in \
         two or three sentences suitable for the paper body.",
        document.title, section.title, figure.caption
    );
    ModelRequest::text(prompt, options).with_image(image)
}

/// Request normalising raw table source into Markdown.
pub fn table(table: &Table, source: &str, options: LlmOptions) -> ModelRequest {
    let prompt = format!(
        "Convert the data below into a single Markdown table titled \"{}\". \
         Keep every value, add a header row, output only the table.\n\n{}",
        table.caption, source
    );
    ModelRequest::text(prompt, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outline_lists_only_regular_chapters() {
        let document = Document {
            title: "T".into(),
            sections: vec![
                Section { id: "abs".into(), title: "摘要".into(), level: 0, ..Default::default() },
                Section { id: "ch1".into(), title: "Intro".into(), level: 1, target_words: Some(800), ..Default::default() },
            ],
            ..Default::default()
        };
        let request = outline(&document, LlmOptions::default());
        assert!(request.prompt.contains("- ch1: Intro (~800 chars)"));
        assert!(!request.prompt.contains("abs:"));
    }
}
