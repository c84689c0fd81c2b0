//! Outline step: proposes subsections for every chapter.
//!
//! The reasoning backend answers with JSON. A response the gateway cannot
//! parse even after its repair pass puts the step in degraded mode: the
//! existing structure is kept and the task still succeeds, with a note.

use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::{GenerationUnit, Section};
use crate::executor::{prompt, ExecutionContext, ExecutorError, StepExecutor, StepOutcome};
use crate::gateway::GatewayError;
use crate::types::task::{BackendClass, TaskKind};

/// Task note when the outline response was unusable.
pub const OUTLINE_KEPT: &str = "outline kept unchanged";

#[derive(Debug, Deserialize)]
struct OutlinePlan {
    #[serde(default)]
    sections: Vec<PlannedChapter>,
}

#[derive(Debug, Deserialize)]
struct PlannedChapter {
    id: String,
    #[serde(default)]
    children: Vec<PlannedSection>,
}

#[derive(Debug, Deserialize)]
struct PlannedSection {
    #[serde(default)]
    id: Option<String>,
    title: String,
    #[serde(default)]
    target_words: Option<u32>,
    #[serde(default)]
    notes: Option<String>,
}

impl PlannedChapter {
    fn into_sections(self) -> Vec<Section> {
        let chapter_id = self.id;
        self.children
            .into_iter()
            .enumerate()
            .map(|(i, child)| Section {
                id: child
                    .id
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or_else(|| format!("{}.{}", chapter_id, i + 1)),
                title: child.title,
                level: 2,
                target_words: child.target_words,
                notes: child.notes,
                ..Default::default()
            })
            .collect()
    }
}

/// Runs the outline step at document scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutlineExecutor;

#[async_trait]
impl StepExecutor for OutlineExecutor {
    fn kind(&self) -> TaskKind {
        TaskKind::Outline
    }

    async fn execute(
        &self,
        unit: &GenerationUnit,
        ctx: &ExecutionContext,
    ) -> Result<StepOutcome, ExecutorError> {
        let document = &unit.context.document;
        if document.chapters().all(|c| c.is_special()) {
            return Err(ExecutorError::Precondition(format!(
                "document {} has no chapters to outline",
                unit.scope_id
            )));
        }

        let request = prompt::outline(document, unit.options);
        let value = match ctx
            .invoke_structured(TaskKind::Outline, BackendClass::Reasoning, &request)
            .await
        {
            Ok(value) => value,
            Err(ExecutorError::Gateway(GatewayError::ContentInvalid { message, .. })) => {
                tracing::warn!(scope_id = %unit.scope_id, error = %message, "outline unparsable, keeping structure");
                return Ok(StepOutcome::with_message(OUTLINE_KEPT));
            },
            Err(err) => return Err(err),
        };

        let plan: OutlinePlan = match serde_json::from_value(value) {
            Ok(plan) => plan,
            Err(err) => {
                tracing::warn!(scope_id = %unit.scope_id, error = %err, "outline has the wrong shape, keeping structure");
                return Ok(StepOutcome::with_message(OUTLINE_KEPT));
            },
        };
        ctx.progress(50, "outline received").await;

        let mut written = 0usize;
        for chapter in plan.sections {
            let known = document
                .chapters()
                .any(|c| c.id == chapter.id && !c.is_special());
            if !known || chapter.children.is_empty() {
                continue;
            }
            let chapter_id = chapter.id.clone();
            ctx.documents
                .write_outline(&unit.scope_id, &chapter_id, chapter.into_sections())
                .await?;
            written += 1;
        }

        if written == 0 {
            return Ok(StepOutcome::with_message(OUTLINE_KEPT));
        }
        Ok(StepOutcome::with_message(format!("outlined {written} chapters")))
    }
}
