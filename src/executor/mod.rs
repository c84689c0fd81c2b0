//! Step executors: one per generation kind.
//!
//! An executor turns a [`GenerationUnit`] into document writes, calling the
//! [`ModelGateway`] zero or more times. Executors never touch the Task
//! Registry status directly; the dispatcher starts and finishes the task
//! around [`StepExecutor::execute`] and maps the returned error onto the
//! terminal status.
//!
//! Cancellation is cooperative. [`ExecutionContext::invoke`] checks for a
//! cancel request before every gateway call, and the gateway abandons an
//! in-flight call when the task's cancellation token fires. Executors that
//! do long local work between calls should call
//! [`ExecutionContext::checkpoint`] themselves.

pub mod abstracts;
pub mod documents;
pub mod draft;
pub mod export;
pub mod image;
pub mod outline;
pub mod prompt;
pub mod refine;
pub mod render;
pub mod table;
pub mod text;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use documents::{AbstractLanguage, DocumentError, DocumentStore, InMemoryDocumentStore};
pub use render::{DocumentRenderer, ExportArtifact, MarkdownRenderer, RenderError};

use crate::context::TaskContext;
use crate::domain::{Document, GenerationUnit, UnitContext};
use crate::error::TaskError;
use crate::gateway::{GatewayError, InvokeOptions, LlmOptions, ModelGateway, ModelRequest};
use crate::types::task::{BackendClass, TaskKind};

/// Errors an executor can end with.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// A model call failed after classification and retries.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// A registry call failed.
    #[error(transparent)]
    Task(#[from] TaskError),

    /// Reading or writing document content failed.
    #[error(transparent)]
    Document(#[from] DocumentError),

    /// Rendering the export failed.
    #[error(transparent)]
    Render(#[from] RenderError),

    /// Cancellation was requested and observed.
    #[error("cancelled")]
    Cancelled,

    /// The document is not in a state this step can work from.
    #[error("{0}")]
    Precondition(String),
}

impl ExecutorError {
    /// Returns `true` if the error is an observed cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Gateway(GatewayError::Cancelled))
    }
}

/// What a successful step reports back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutcome {
    /// Status note recorded on the task.
    pub message: Option<String>,
}

impl StepOutcome {
    /// Success with a status note.
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }
}

/// Everything an executor needs besides the unit itself.
#[derive(Clone)]
pub struct ExecutionContext {
    /// Handle on the executing task.
    pub task: TaskContext,
    /// Shared model gateway.
    pub gateway: Arc<ModelGateway>,
    /// Document accessor.
    pub documents: Arc<dyn DocumentStore>,
    /// Per-call options; the cancel token is the task's.
    pub invoke: InvokeOptions,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("task", &self.task)
            .field("invoke", &self.invoke)
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    /// Fails with [`ExecutorError::Cancelled`] if cancellation was requested.
    ///
    /// # Errors
    ///
    /// [`ExecutorError::Cancelled`], or a registry read failure.
    pub async fn checkpoint(&self) -> Result<(), ExecutorError> {
        if self.task.is_cancel_requested().await? {
            tracing::debug!(task_id = self.task.task_id(), "cancellation observed");
            return Err(ExecutorError::Cancelled);
        }
        Ok(())
    }

    /// Checkpoints, then invokes the model for text.
    ///
    /// # Errors
    ///
    /// Cancellation or any [`GatewayError`].
    pub async fn invoke(
        &self,
        kind: TaskKind,
        class: BackendClass,
        request: &ModelRequest,
    ) -> Result<String, ExecutorError> {
        self.checkpoint().await?;
        Ok(self.gateway.invoke(kind, class, request, &self.invoke).await?)
    }

    /// Checkpoints, then invokes the model for JSON output.
    ///
    /// # Errors
    ///
    /// Cancellation or any [`GatewayError`].
    pub async fn invoke_structured(
        &self,
        kind: TaskKind,
        class: BackendClass,
        request: &ModelRequest,
    ) -> Result<Value, ExecutorError> {
        self.checkpoint().await?;
        Ok(self
            .gateway
            .invoke_structured(kind, class, request, &self.invoke)
            .await?)
    }

    /// Reports intermediate progress; failures are logged, not raised.
    pub async fn progress(&self, progress: u8, message: &str) {
        if let Err(err) = self
            .task
            .report_progress(progress, Some(message.to_string()))
            .await
        {
            tracing::debug!(task_id = self.task.task_id(), error = %err, "progress update skipped");
        }
    }
}

/// One generation step.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// The kind this executor serves.
    fn kind(&self) -> TaskKind;

    /// Runs the step for one unit.
    async fn execute(
        &self,
        unit: &GenerationUnit,
        ctx: &ExecutionContext,
    ) -> Result<StepOutcome, ExecutorError>;
}

/// Executors indexed by kind.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use aiwrite_tasks::executor::{ExecutorSet, MarkdownRenderer};
/// use aiwrite_tasks::TaskKind;
///
/// let set = ExecutorSet::standard(Arc::new(MarkdownRenderer));
/// for kind in TaskKind::ALL {
///     assert_eq!(set.get(kind).unwrap().kind(), kind);
/// }
/// ```
#[derive(Clone, Default)]
pub struct ExecutorSet {
    executors: HashMap<TaskKind, Arc<dyn StepExecutor>>,
}

impl std::fmt::Debug for ExecutorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.executors.keys().collect();
        kinds.sort();
        f.debug_struct("ExecutorSet").field("kinds", &kinds).finish()
    }
}

impl ExecutorSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// All built-in executors; exports go through `renderer`.
    pub fn standard(renderer: Arc<dyn DocumentRenderer>) -> Self {
        Self::new()
            .with(Arc::new(outline::OutlineExecutor))
            .with(Arc::new(draft::DraftExecutor))
            .with(Arc::new(refine::RefineExecutor))
            .with(Arc::new(abstracts::AbstractExecutor))
            .with(Arc::new(image::ImageExecutor))
            .with(Arc::new(table::TableExecutor))
            .with(Arc::new(export::ExportExecutor::new(renderer)))
    }

    /// Registers `executor` for its kind, replacing any previous one.
    pub fn with(mut self, executor: Arc<dyn StepExecutor>) -> Self {
        self.executors.insert(executor.kind(), executor);
        self
    }

    /// The executor for `kind`.
    pub fn get(&self, kind: TaskKind) -> Option<Arc<dyn StepExecutor>> {
        self.executors.get(&kind).cloned()
    }
}

/// Builds the unit for `kind` over `document`, capturing the context the
/// executor needs: the previous chapter's summary and the target length
/// for drafts.
///
/// # Examples
///
/// ```
/// use aiwrite_tasks::domain::{Document, Section};
/// use aiwrite_tasks::executor::build_unit;
/// use aiwrite_tasks::gateway::LlmOptions;
/// use aiwrite_tasks::TaskKind;
///
/// let doc = Document {
///     id: "P1".into(),
///     sections: vec![
///         Section { id: "ch1".into(), title: "Intro".into(), level: 1, draft: Some("Caching matters.".into()), ..Default::default() },
///         Section { id: "ch2".into(), title: "Method".into(), level: 1, target_words: Some(1500), ..Default::default() },
///     ],
///     ..Default::default()
/// };
/// let unit = build_unit(doc, TaskKind::Draft, Some("ch2"), LlmOptions::default());
/// assert_eq!(unit.context.previous_summary.as_deref(), Some("Intro: Caching matters."));
/// assert_eq!(unit.context.target_words, Some(1500));
/// ```
pub fn build_unit(
    document: Document,
    kind: TaskKind,
    sub_scope_id: Option<&str>,
    options: LlmOptions,
) -> GenerationUnit {
    let mut context = UnitContext::default();

    if let (TaskKind::Draft | TaskKind::Refine, Some(sub)) = (kind, sub_scope_id) {
        if let Some(section) = document.find_section(sub) {
            context.target_words = Some(section.effective_target_words());
        }
        if kind == TaskKind::Draft {
            context.previous_summary = previous_chapter_summary(&document, sub);
        }
    }

    GenerationUnit {
        scope_id: document.id.clone(),
        sub_scope_id: sub_scope_id.map(str::to_string),
        kind,
        context: UnitContext { document, ..context },
        options,
    }
}

fn previous_chapter_summary(document: &Document, chapter_id: &str) -> Option<String> {
    let chapters: Vec<_> = document.chapters().filter(|c| !c.is_special()).collect();
    let index = chapters.iter().position(|c| c.id == chapter_id)?;
    let previous = chapters.get(index.checked_sub(1)?)?;
    previous
        .best_text()
        .map(|text| text::summarize(&previous.title, text))
}
