//! Export rendering collaborator.

use thiserror::Error;

use crate::domain::{Document, Section};

/// A rendered document.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportArtifact {
    /// Suggested file name.
    pub file_name: String,
    /// MIME type of `bytes`.
    pub media_type: String,
    /// Rendered content.
    pub bytes: Vec<u8>,
}

/// Rendering failures.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Nothing to render.
    #[error("document {0} has no content to export")]
    EmptyDocument(String),
    /// Renderer-specific failure.
    #[error("render failed: {0}")]
    Failed(String),
}

/// Turns a finished document into an export artifact.
///
/// Format details (Word, LaTeX, PDF) belong to the implementation; the
/// export step only sequences it after content generation.
pub trait DocumentRenderer: Send + Sync {
    /// Renders `document`.
    fn render(&self, document: &Document) -> Result<ExportArtifact, RenderError>;
}

/// Renders a document as Markdown.
///
/// # Examples
///
/// ```
/// use aiwrite_tasks::domain::{Document, Section};
/// use aiwrite_tasks::executor::{DocumentRenderer, MarkdownRenderer};
///
/// let doc = Document {
///     id: "P1".into(),
///     title: "Edge caching".into(),
///     sections: vec![Section {
///         id: "ch1".into(),
///         title: "Introduction".into(),
///         level: 1,
///         final_text: Some("Caches help.".into()),
///         ..Default::default()
///     }],
///     ..Default::default()
/// };
/// let artifact = MarkdownRenderer.render(&doc).unwrap();
/// let text = String::from_utf8(artifact.bytes).unwrap();
/// assert!(text.starts_with("# Edge caching"));
/// assert!(text.contains("## Introduction\n\nCaches help."));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownRenderer;

impl MarkdownRenderer {
    fn section(out: &mut String, section: &Section) {
        let depth = usize::from(section.level).clamp(1, 5) + 1;
        out.push_str(&format!("\n{} {}\n", "#".repeat(depth), section.title));
        if let Some(text) = section.best_text() {
            out.push_str(&format!("\n{}\n", text.trim()));
        }
        for figure in &section.figures {
            let path = figure.path.as_deref().unwrap_or("");
            out.push_str(&format!("\n![{}]({})\n", figure.caption, path));
            if let Some(description) = &figure.description {
                out.push_str(&format!("\n{description}\n"));
            }
        }
        for table in &section.tables {
            out.push_str(&format!("\n**{}**\n", table.caption));
            if let Some(content) = &table.content {
                out.push_str(&format!("\n{}\n", content.trim()));
            }
        }
        for child in &section.children {
            Self::section(out, child);
        }
    }
}

impl DocumentRenderer for MarkdownRenderer {
    fn render(&self, document: &Document) -> Result<ExportArtifact, RenderError> {
        if document.all_sections().iter().all(|s| s.best_text().is_none()) {
            return Err(RenderError::EmptyDocument(document.id.clone()));
        }

        let mut out = format!("# {}\n", document.title);
        for section in &document.sections {
            Self::section(&mut out, section);
        }

        Ok(ExportArtifact {
            file_name: format!("{}.md", document.id),
            media_type: "text/markdown".to_string(),
            bytes: out.into_bytes(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_rejected() {
        let doc = Document {
            id: "P9".into(),
            title: "Nothing yet".into(),
            ..Default::default()
        };
        assert!(matches!(
            MarkdownRenderer.render(&doc),
            Err(RenderError::EmptyDocument(id)) if id == "P9"
        ));
    }
}
