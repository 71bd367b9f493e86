//! Delete-Source: drop one source's blob and knowledge base entries, publish,
//! and remove it from the workspace.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use atrium_core::{
    kb_source_name, KbUpdate, NotificationEvent, Result, WorkflowKind, Workspace,
};

use super::Shared;
use crate::handler::{WorkflowContext, WorkflowHandler, WorkflowOutcome};

const DELETE_BLOB: &str = "delete_blob";
const SUBMIT_KB_DELETE: &str = "submit_kb_delete";
const AWAIT_KB_DELETE: &str = "await_kb_delete";
const PUBLISH: &str = "publish";

/// Input of a delete-source run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteSourceInput {
    pub workspace_id: String,
    /// Storage path identifying the source.
    pub storage_path: String,
}

pub struct DeleteSourceWorkflow {
    shared: Arc<Shared>,
}

impl DeleteSourceWorkflow {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    #[instrument(
        skip(self, ctx, input),
        fields(subsystem = "jobs", component = "orchestrator", op = "delete_source", workflow_id = %ctx.run_id(), workspace_id = %input.workspace_id, blob_path = %input.storage_path)
    )]
    async fn run(&self, ctx: &mut WorkflowContext, input: &DeleteSourceInput) -> Result<()> {
        if !ctx.is_done(DELETE_BLOB) {
            let deleted = self
                .shared
                .objects
                .delete_if_exists(&input.storage_path)
                .await?;
            info!(deleted, "Source blob removed");
            ctx.complete_activity(DELETE_BLOB).await?;
        }
        if !ctx.is_done(SUBMIT_KB_DELETE) {
            let update =
                KbUpdate::delete_sources(vec![kb_source_name(&input.storage_path).to_string()]);
            self.shared
                .submit_update(ctx, SUBMIT_KB_DELETE, update)
                .await?;
        }
        if !ctx.is_done(AWAIT_KB_DELETE) {
            self.shared
                .await_update(ctx, SUBMIT_KB_DELETE, AWAIT_KB_DELETE)
                .await?;
        }
        if !ctx.is_done(PUBLISH) {
            self.publish(input).await?;
            ctx.complete_activity(PUBLISH).await?;
        }
        Ok(())
    }

    async fn publish(&self, input: &DeleteSourceInput) -> Result<()> {
        self.shared.kb.publish(&self.shared.config.kb_id).await?;

        let workspace: Workspace = self
            .shared
            .entities
            .update(&input.workspace_id, |ws: &mut Workspace| {
                let before = ws.sources.len();
                ws.sources.retain(|s| s.storage_path != input.storage_path);
                Ok(ws.sources.len() != before)
            })
            .await?;

        info!(
            remaining_sources = workspace.sources.len(),
            "Source removed from workspace"
        );
        self.shared
            .notifier
            .to_group(
                &workspace.id,
                NotificationEvent::WorkspaceSourceDeleted,
                &workspace,
            )
            .await;
        Ok(())
    }
}

#[async_trait]
impl WorkflowHandler for DeleteSourceWorkflow {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::DeleteSource
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> WorkflowOutcome {
        let input: DeleteSourceInput = match ctx.input() {
            Ok(input) => input,
            Err(e) => return WorkflowOutcome::Failed(e.to_string()),
        };
        let result = self.run(ctx, &input).await;
        if let Err(e) = &result {
            error!(
                subsystem = "jobs",
                component = "orchestrator",
                workflow_id = %ctx.run_id(),
                workspace_id = %input.workspace_id,
                error = %e,
                "Delete-source failed"
            );
        }
        WorkflowOutcome::from_result(result)
    }
}
