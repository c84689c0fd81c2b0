//! Table-parse step: normalises uploaded table data into Markdown.

use async_trait::async_trait;

use crate::domain::GenerationUnit;
use crate::executor::{prompt, text, ExecutionContext, ExecutorError, StepExecutor, StepOutcome};
use crate::types::task::{BackendClass, TaskKind};

/// Parses the table named by the unit's sub-scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableExecutor;

#[async_trait]
impl StepExecutor for TableExecutor {
    fn kind(&self) -> TaskKind {
        TaskKind::TableParse
    }

    async fn execute(
        &self,
        unit: &GenerationUnit,
        ctx: &ExecutionContext,
    ) -> Result<StepOutcome, ExecutorError> {
        let (_, table) = unit
            .context
            .document
            .all_tables()
            .into_iter()
            .find(|(_, t)| t.id == unit.sub_scope())
            .ok_or_else(|| {
                ExecutorError::Precondition(format!("table {} not found", unit.sub_scope()))
            })?;
        let source = table.source.as_deref().ok_or_else(|| {
            ExecutorError::Precondition(format!("table {} has no source data", table.id))
        })?;

        let request = prompt::table(table, source, unit.options);
        let raw = ctx
            .invoke(TaskKind::TableParse, BackendClass::Writing, &request)
            .await?;
        let content = text::strip_code_fence(&raw);

        ctx.documents
            .write_table_content(&unit.scope_id, &table.id, &content)
            .await?;
        Ok(StepOutcome::with_message(format!(
            "parsed {} ({} rows)",
            table.id,
            content.lines().filter(|l| l.trim_start().starts_with('|')).count()
        )))
    }
}
