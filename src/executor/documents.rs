//! Document-state accessor consumed by the executors.
//!
//! Executors never own document storage. They read a [`Document`] snapshot
//! and write results back one field at a time through [`DocumentStore`],
//! keyed by scope and sub-scope identifiers. Writes to different sections,
//! figures or tables are independent, so concurrent executors never
//! interfere with each other's output.

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use crate::domain::{Document, Figure, Section, Table};
use crate::executor::render::ExportArtifact;

/// Which abstract block a write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbstractLanguage {
    /// The Chinese abstract (`摘要`).
    Chinese,
    /// The English abstract.
    English,
}

impl AbstractLanguage {
    fn title(&self) -> &'static str {
        match self {
            Self::Chinese => "摘要",
            Self::English => "Abstract",
        }
    }

    fn id(&self) -> &'static str {
        match self {
            Self::Chinese => "abstract-cn",
            Self::English => "abstract-en",
        }
    }
}

/// Errors raised by a [`DocumentStore`].
#[derive(Debug, Error)]
pub enum DocumentError {
    /// No document for the scope.
    #[error("document not found: {scope_id}")]
    NotFound {
        /// The scope looked up.
        scope_id: String,
    },

    /// The named section, figure or table does not exist.
    #[error("{what} {id} not found in document {scope_id}")]
    MissingPart {
        /// Scope searched.
        scope_id: String,
        /// `section`, `figure` or `table`.
        what: &'static str,
        /// Identifier looked up.
        id: String,
    },

    /// An uploaded image could not be read.
    #[error("image {path} unavailable")]
    ImageUnavailable {
        /// Path of the image.
        path: String,
    },

    /// Storage failure.
    #[error("document storage error: {0}")]
    Storage(String),
}

/// Read/write access to document content, keyed by scope.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Loads a snapshot of the document.
    async fn load(&self, scope_id: &str) -> Result<Document, DocumentError>;

    /// Stores a section's first draft.
    async fn write_section_draft(
        &self,
        scope_id: &str,
        section_id: &str,
        text: &str,
    ) -> Result<(), DocumentError>;

    /// Stores a section's polished text.
    async fn write_section_final(
        &self,
        scope_id: &str,
        section_id: &str,
        text: &str,
    ) -> Result<(), DocumentError>;

    /// Replaces a chapter's subsections.
    async fn write_outline(
        &self,
        scope_id: &str,
        chapter_id: &str,
        children: Vec<Section>,
    ) -> Result<(), DocumentError>;

    /// Stores a figure's description.
    async fn write_figure_description(
        &self,
        scope_id: &str,
        figure_id: &str,
        text: &str,
    ) -> Result<(), DocumentError>;

    /// Stores a table's normalised content.
    async fn write_table_content(
        &self,
        scope_id: &str,
        table_id: &str,
        text: &str,
    ) -> Result<(), DocumentError>;

    /// Stores an abstract, creating the block when the document has none.
    async fn write_abstract(
        &self,
        scope_id: &str,
        language: AbstractLanguage,
        text: &str,
    ) -> Result<(), DocumentError>;

    /// Reads an uploaded image.
    async fn read_image(&self, scope_id: &str, path: &str) -> Result<Vec<u8>, DocumentError>;

    /// Stores a rendered export.
    async fn store_export(
        &self,
        scope_id: &str,
        artifact: ExportArtifact,
    ) -> Result<(), DocumentError>;
}

/// In-process [`DocumentStore`] for tests and embedding.
///
/// # Examples
///
/// ```
/// use aiwrite_tasks::domain::{Document, Section};
/// use aiwrite_tasks::executor::{DocumentStore, InMemoryDocumentStore};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let store = InMemoryDocumentStore::new();
/// store.insert(Document {
///     id: "P1".into(),
///     title: "Edge caching".into(),
///     sections: vec![Section { id: "ch1".into(), title: "Intro".into(), level: 1, ..Default::default() }],
///     ..Default::default()
/// });
///
/// store.write_section_draft("P1", "ch1", "draft text").await.unwrap();
/// let doc = store.load("P1").await.unwrap();
/// assert_eq!(doc.sections[0].draft.as_deref(), Some("draft text"));
/// # });
/// ```
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: DashMap<String, Document>,
    images: DashMap<String, Vec<u8>>,
    exports: DashMap<String, ExportArtifact>,
}

impl InMemoryDocumentStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a document, keyed by its `id`.
    pub fn insert(&self, document: Document) {
        self.documents.insert(document.id.clone(), document);
    }

    /// Registers image bytes under `path`.
    pub fn insert_image(&self, path: &str, bytes: Vec<u8>) {
        self.images.insert(path.to_string(), bytes);
    }

    /// The last export stored for a scope.
    pub fn export(&self, scope_id: &str) -> Option<ExportArtifact> {
        self.exports.get(scope_id).map(|a| a.clone())
    }

    fn with_document<T>(
        &self,
        scope_id: &str,
        f: impl FnOnce(&mut Document) -> Result<T, DocumentError>,
    ) -> Result<T, DocumentError> {
        let mut document = self
            .documents
            .get_mut(scope_id)
            .ok_or_else(|| DocumentError::NotFound {
                scope_id: scope_id.to_string(),
            })?;
        f(&mut document)
    }

    fn with_section(
        &self,
        scope_id: &str,
        section_id: &str,
        f: impl FnOnce(&mut Section),
    ) -> Result<(), DocumentError> {
        self.with_document(scope_id, |document| {
            let section = document
                .sections
                .iter_mut()
                .find_map(|s| find_section_mut(s, section_id))
                .ok_or_else(|| missing(scope_id, "section", section_id))?;
            f(section);
            Ok(())
        })
    }
}

fn missing(scope_id: &str, what: &'static str, id: &str) -> DocumentError {
    DocumentError::MissingPart {
        scope_id: scope_id.to_string(),
        what,
        id: id.to_string(),
    }
}

fn find_section_mut<'a>(section: &'a mut Section, id: &str) -> Option<&'a mut Section> {
    if section.id == id {
        return Some(section);
    }
    section
        .children
        .iter_mut()
        .find_map(|child| find_section_mut(child, id))
}

fn find_figure_mut<'a>(sections: &'a mut [Section], id: &str) -> Option<&'a mut Figure> {
    for section in sections {
        if let Some(figure) = section.figures.iter_mut().find(|f| f.id == id) {
            return Some(figure);
        }
        if let Some(figure) = find_figure_mut(&mut section.children, id) {
            return Some(figure);
        }
    }
    None
}

fn find_table_mut<'a>(sections: &'a mut [Section], id: &str) -> Option<&'a mut Table> {
    for section in sections {
        if let Some(table) = section.tables.iter_mut().find(|t| t.id == id) {
            return Some(table);
        }
        if let Some(table) = find_table_mut(&mut section.children, id) {
            return Some(table);
        }
    }
    None
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn load(&self, scope_id: &str) -> Result<Document, DocumentError> {
        self.documents
            .get(scope_id)
            .map(|d| d.clone())
            .ok_or_else(|| DocumentError::NotFound {
                scope_id: scope_id.to_string(),
            })
    }

    async fn write_section_draft(
        &self,
        scope_id: &str,
        section_id: &str,
        text: &str,
    ) -> Result<(), DocumentError> {
        self.with_section(scope_id, section_id, |s| s.draft = Some(text.to_string()))
    }

    async fn write_section_final(
        &self,
        scope_id: &str,
        section_id: &str,
        text: &str,
    ) -> Result<(), DocumentError> {
        self.with_section(scope_id, section_id, |s| {
            s.final_text = Some(text.to_string())
        })
    }

    async fn write_outline(
        &self,
        scope_id: &str,
        chapter_id: &str,
        children: Vec<Section>,
    ) -> Result<(), DocumentError> {
        self.with_section(scope_id, chapter_id, |s| s.children = children)
    }

    async fn write_figure_description(
        &self,
        scope_id: &str,
        figure_id: &str,
        text: &str,
    ) -> Result<(), DocumentError> {
        self.with_document(scope_id, |document| {
            let figure = find_figure_mut(&mut document.sections, figure_id)
                .ok_or_else(|| missing(scope_id, "figure", figure_id))?;
            figure.description = Some(text.to_string());
            Ok(())
        })
    }

    async fn write_table_content(
        &self,
        scope_id: &str,
        table_id: &str,
        text: &str,
    ) -> Result<(), DocumentError> {
        self.with_document(scope_id, |document| {
            let table = find_table_mut(&mut document.sections, table_id)
                .ok_or_else(|| missing(scope_id, "table", table_id))?;
            table.content = Some(text.to_string());
            Ok(())
        })
    }

    async fn write_abstract(
        &self,
        scope_id: &str,
        language: AbstractLanguage,
        text: &str,
    ) -> Result<(), DocumentError> {
        self.with_document(scope_id, |document| {
            let existing = match language {
                AbstractLanguage::Chinese => document.abstract_cn().map(|s| s.id.clone()),
                AbstractLanguage::English => document.abstract_en().map(|s| s.id.clone()),
            };
            let index = match existing.and_then(|id| document.sections.iter().position(|s| s.id == id)) {
                Some(index) => index,
                None => {
                    let position = match language {
                        AbstractLanguage::Chinese => 0,
                        AbstractLanguage::English => usize::from(document.abstract_cn().is_some()),
                    };
                    document.sections.insert(
                        position,
                        Section {
                            id: language.id().to_string(),
                            title: language.title().to_string(),
                            level: 0,
                            ..Default::default()
                        },
                    );
                    position
                },
            };
            let section = &mut document.sections[index];
            section.draft = Some(text.to_string());
            section.final_text = Some(text.to_string());
            Ok(())
        })
    }

    async fn read_image(&self, _scope_id: &str, path: &str) -> Result<Vec<u8>, DocumentError> {
        self.images
            .get(path)
            .map(|bytes| bytes.clone())
            .ok_or_else(|| DocumentError::ImageUnavailable {
                path: path.to_string(),
            })
    }

    async fn store_export(
        &self,
        scope_id: &str,
        artifact: ExportArtifact,
    ) -> Result<(), DocumentError> {
        self.exports.insert(scope_id.to_string(), artifact);
        Ok(())
    }
}
