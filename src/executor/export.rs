//! Export step: renders the finished document.
//!
//! The dispatcher only schedules an export once every content-producing
//! task of the scope is terminal, so this step reloads the document rather
//! than trusting the snapshot taken at dispatch.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::GenerationUnit;
use crate::executor::{DocumentRenderer, ExecutionContext, ExecutorError, StepExecutor, StepOutcome};
use crate::types::task::TaskKind;

/// Renders through a [`DocumentRenderer`] and stores the artifact.
#[derive(Clone)]
pub struct ExportExecutor {
    renderer: Arc<dyn DocumentRenderer>,
}

impl std::fmt::Debug for ExportExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportExecutor").finish_non_exhaustive()
    }
}

impl ExportExecutor {
    /// Creates an export step over `renderer`.
    pub fn new(renderer: Arc<dyn DocumentRenderer>) -> Self {
        Self { renderer }
    }
}

#[async_trait]
impl StepExecutor for ExportExecutor {
    fn kind(&self) -> TaskKind {
        TaskKind::Export
    }

    async fn execute(
        &self,
        unit: &GenerationUnit,
        ctx: &ExecutionContext,
    ) -> Result<StepOutcome, ExecutorError> {
        ctx.checkpoint().await?;
        let document = ctx.documents.load(&unit.scope_id).await?;
        let artifact = self.renderer.render(&document)?;
        let file_name = artifact.file_name.clone();
        let size = artifact.bytes.len();

        ctx.checkpoint().await?;
        ctx.documents.store_export(&unit.scope_id, artifact).await?;
        tracing::info!(scope_id = %unit.scope_id, file_name = %file_name, bytes = size, "document exported");
        Ok(StepOutcome::with_message(format!("exported {file_name}")))
    }
}
