//! Refine step: polishes one chapter's draft into its final text.
//!
//! Unusable output is not fatal here: the draft itself becomes the final
//! text and the task notes the fallback.

use async_trait::async_trait;

use crate::domain::GenerationUnit;
use crate::executor::{prompt, text, ExecutionContext, ExecutorError, StepExecutor, StepOutcome};
use crate::gateway::GatewayError;
use crate::types::task::{BackendClass, TaskKind};

/// Polishes the chapter named by the unit's sub-scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct RefineExecutor;

#[async_trait]
impl StepExecutor for RefineExecutor {
    fn kind(&self) -> TaskKind {
        TaskKind::Refine
    }

    async fn execute(
        &self,
        unit: &GenerationUnit,
        ctx: &ExecutionContext,
    ) -> Result<StepOutcome, ExecutorError> {
        let section = unit
            .context
            .document
            .find_section(unit.sub_scope())
            .ok_or_else(|| {
                ExecutorError::Precondition(format!("section {} not found", unit.sub_scope()))
            })?;
        let draft = section.draft.as_deref().ok_or_else(|| {
            ExecutorError::Precondition(format!("section {} has no draft to refine", section.id))
        })?;

        let request = prompt::refine(&unit.context.document, section, draft, unit.options);
        let refined = match ctx
            .invoke(TaskKind::Refine, BackendClass::Writing, &request)
            .await
        {
            Ok(raw) => Some(text::strip_code_fence(&raw)).filter(|body| !body.is_empty()),
            Err(ExecutorError::Gateway(GatewayError::ContentInvalid { .. })) => None,
            Err(err) => return Err(err),
        };

        match refined {
            Some(body) => {
                ctx.documents
                    .write_section_final(&unit.scope_id, &section.id, &body)
                    .await?;
                Ok(StepOutcome::with_message(format!("refined {}", section.title)))
            },
            None => {
                tracing::warn!(scope_id = %unit.scope_id, section_id = %section.id, "refine output unusable, keeping draft");
                ctx.documents
                    .write_section_final(&unit.scope_id, &section.id, draft)
                    .await?;
                Ok(StepOutcome::with_message(format!(
                    "refine fell back to the draft of {}",
                    section.title
                )))
            },
        }
    }
}
