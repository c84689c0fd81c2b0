//! Draft step: writes the first draft of one chapter.

use async_trait::async_trait;

use crate::domain::GenerationUnit;
use crate::executor::{prompt, text, ExecutionContext, ExecutorError, StepExecutor, StepOutcome};
use crate::gateway::GatewayError;
use crate::types::task::{BackendClass, TaskKind};

/// Drafts the chapter named by the unit's sub-scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct DraftExecutor;

#[async_trait]
impl StepExecutor for DraftExecutor {
    fn kind(&self) -> TaskKind {
        TaskKind::Draft
    }

    async fn execute(
        &self,
        unit: &GenerationUnit,
        ctx: &ExecutionContext,
    ) -> Result<StepOutcome, ExecutorError> {
        let document = &unit.context.document;
        let section = document.find_section(unit.sub_scope()).ok_or_else(|| {
            ExecutorError::Precondition(format!("section {} not found", unit.sub_scope()))
        })?;
        if section.is_special() {
            return Ok(StepOutcome::with_message(format!(
                "{} is not drafted as a chapter",
                section.title
            )));
        }

        let target = unit
            .context
            .target_words
            .unwrap_or_else(|| section.effective_target_words());
        let request = prompt::draft(
            document,
            section,
            unit.context.previous_summary.as_deref(),
            target,
            unit.options,
        );
        let raw = ctx
            .invoke(TaskKind::Draft, BackendClass::Writing, &request)
            .await?;

        let body = text::strip_code_fence(&raw);
        if body.is_empty() {
            return Err(GatewayError::ContentInvalid {
                attempts: 1,
                message: "draft was only a code fence".to_string(),
            }
            .into());
        }

        ctx.documents
            .write_section_draft(&unit.scope_id, &section.id, &body)
            .await?;
        Ok(StepOutcome::with_message(format!(
            "drafted {} ({} chars)",
            section.title,
            body.chars().count()
        )))
    }
}
