//! The ephemeral input handed to a step executor.

use crate::domain::document::Document;
use crate::gateway::LlmOptions;
use crate::types::task::TaskKind;

/// One schedulable unit of generation work.
///
/// Built by the dispatcher per job and never persisted. The `context`
/// carries the minimal document snapshot the executor needs.
#[derive(Debug, Clone)]
pub struct GenerationUnit {
    /// Scope (document) identifier.
    pub scope_id: String,
    /// Section, figure or table targeted, if any.
    pub sub_scope_id: Option<String>,
    /// The generation kind.
    pub kind: TaskKind,
    /// Snapshot taken when the unit was built.
    pub context: UnitContext,
    /// Sampling options for model calls.
    pub options: LlmOptions,
}

/// Document context captured for a unit.
#[derive(Debug, Clone, Default)]
pub struct UnitContext {
    /// The document as loaded at dispatch time.
    pub document: Document,
    /// Summary of the preceding chapter, for continuity between drafts.
    pub previous_summary: Option<String>,
    /// Target length for the unit, when it has one.
    pub target_words: Option<u32>,
}

impl GenerationUnit {
    /// Sub-scope identifier or an empty string for document-scope units.
    pub fn sub_scope(&self) -> &str {
        self.sub_scope_id.as_deref().unwrap_or("")
    }
}
