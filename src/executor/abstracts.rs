//! Abstract step: Chinese abstract from the body, then English from it.

use async_trait::async_trait;

use crate::domain::GenerationUnit;
use crate::executor::{
    prompt, text, AbstractLanguage, ExecutionContext, ExecutorError, StepExecutor, StepOutcome,
};
use crate::types::task::{BackendClass, TaskKind};

/// Writes both abstracts at document scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct AbstractExecutor;

#[async_trait]
impl StepExecutor for AbstractExecutor {
    fn kind(&self) -> TaskKind {
        TaskKind::Abstract
    }

    async fn execute(
        &self,
        unit: &GenerationUnit,
        ctx: &ExecutionContext,
    ) -> Result<StepOutcome, ExecutorError> {
        let document = &unit.context.document;
        let body = document.body_text();
        if body.trim().is_empty() {
            return Err(ExecutorError::Precondition(format!(
                "document {} has no content to summarise",
                unit.scope_id
            )));
        }

        let request = prompt::abstract_cn(document, &body, unit.options);
        let chinese = text::strip_code_fence(
            &ctx.invoke(TaskKind::Abstract, BackendClass::Reasoning, &request)
                .await?,
        );
        ctx.documents
            .write_abstract(&unit.scope_id, AbstractLanguage::Chinese, &chinese)
            .await?;
        ctx.progress(50, "chinese abstract written").await;

        let request = prompt::abstract_en(document, &chinese, unit.options);
        let english = text::strip_code_fence(
            &ctx.invoke(TaskKind::Abstract, BackendClass::Writing, &request)
                .await?,
        );
        ctx.documents
            .write_abstract(&unit.scope_id, AbstractLanguage::English, &english)
            .await?;

        Ok(StepOutcome::with_message("abstracts written"))
    }
}
