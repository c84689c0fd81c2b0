//! Image-analysis step: describes one figure with the vision backend.

use async_trait::async_trait;

use crate::domain::GenerationUnit;
use crate::executor::{prompt, ExecutionContext, ExecutorError, StepExecutor, StepOutcome};
use crate::executor::text::media_type_for;
use crate::gateway::ImagePayload;
use crate::types::task::{BackendClass, TaskKind};

/// Describes the figure named by the unit's sub-scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageExecutor;

#[async_trait]
impl StepExecutor for ImageExecutor {
    fn kind(&self) -> TaskKind {
        TaskKind::ImageAnalysis
    }

    async fn execute(
        &self,
        unit: &GenerationUnit,
        ctx: &ExecutionContext,
    ) -> Result<StepOutcome, ExecutorError> {
        let document = &unit.context.document;
        let (section, figure) = document
            .all_figures()
            .into_iter()
            .find(|(_, f)| f.id == unit.sub_scope())
            .ok_or_else(|| {
                ExecutorError::Precondition(format!("figure {} not found", unit.sub_scope()))
            })?;
        let path = figure.path.as_deref().ok_or_else(|| {
            ExecutorError::Precondition(format!("figure {} has no image", figure.id))
        })?;

        let data = ctx.documents.read_image(&unit.scope_id, path).await?;
        let payload = ImagePayload {
            media_type: media_type_for(path).to_string(),
            data,
        };
        let request = prompt::image(document, section, figure, payload, unit.options);
        let description = ctx
            .invoke(TaskKind::ImageAnalysis, BackendClass::Vision, &request)
            .await?;

        ctx.documents
            .write_figure_description(&unit.scope_id, &figure.id, description.trim())
            .await?;
        Ok(StepOutcome::with_message(format!("described {}", figure.id)))
    }
}
