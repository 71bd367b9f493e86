//! Delete-Workspace: sever memberships, remove blobs and notes, remove the
//! knowledge base entries, then delete the record itself.
//!
//! Membership goes first so no further writes target the workspace; the
//! record is deleted last.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use atrium_core::{
    EntityQuery, KbUpdate, Note, NotificationEvent, Result, SortDirection, WorkflowKind, Workspace,
};

use super::Shared;
use crate::handler::{WorkflowContext, WorkflowHandler, WorkflowOutcome};

const SNAPSHOT: &str = "snapshot";
const DETACH_MEMBERS: &str = "detach_members";
const DELETE_BLOBS: &str = "delete_blobs";
const DELETE_NOTES: &str = "delete_notes";
const SUBMIT_KB_DELETE: &str = "submit_kb_delete";
const AWAIT_KB_DELETE: &str = "await_kb_delete";
const FINALIZE: &str = "finalize";

const SNAPSHOT_KEY: &str = "workspace";

/// Input of a delete-workspace run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteWorkspaceInput {
    pub workspace_id: String,
}

pub struct DeleteWorkspaceWorkflow {
    shared: Arc<Shared>,
}

impl DeleteWorkspaceWorkflow {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    #[instrument(
        skip(self, ctx, input),
        fields(subsystem = "jobs", component = "orchestrator", op = "delete_workspace", workflow_id = %ctx.run_id(), workspace_id = %input.workspace_id)
    )]
    async fn run(&self, ctx: &mut WorkflowContext, input: &DeleteWorkspaceInput) -> Result<()> {
        // Later activities work from this copy; the record is gone by the
        // time a resumed run reaches them.
        if !ctx.is_done(SNAPSHOT) {
            let workspace: Workspace = self.shared.entities.require(&input.workspace_id).await?;
            ctx.set_state(SNAPSHOT_KEY, &workspace)?;
            ctx.complete_activity(SNAPSHOT).await?;
        }
        let workspace: Workspace = ctx.require_state(SNAPSHOT_KEY)?;

        if !ctx.is_done(DETACH_MEMBERS) {
            self.detach_members(&workspace).await?;
            ctx.complete_activity(DETACH_MEMBERS).await?;
        }
        if !ctx.is_done(DELETE_BLOBS) {
            for source in &workspace.sources {
                self.shared
                    .objects
                    .delete_if_exists(&source.storage_path)
                    .await?;
            }
            info!(count = workspace.sources.len(), "Workspace blobs removed");
            ctx.complete_activity(DELETE_BLOBS).await?;
        }
        if !ctx.is_done(DELETE_NOTES) {
            self.delete_notes(&workspace.id).await?;
            ctx.complete_activity(DELETE_NOTES).await?;
        }
        if !ctx.is_done(SUBMIT_KB_DELETE) {
            let names = workspace
                .sources
                .iter()
                .map(|s| s.kb_source_name().to_string())
                .collect();
            self.shared
                .submit_update(ctx, SUBMIT_KB_DELETE, KbUpdate::delete_sources(names))
                .await?;
        }
        if !ctx.is_done(AWAIT_KB_DELETE) {
            self.shared
                .await_update(ctx, SUBMIT_KB_DELETE, AWAIT_KB_DELETE)
                .await?;
        }
        if !ctx.is_done(FINALIZE) {
            self.shared.kb.publish(&self.shared.config.kb_id).await?;
            self.shared
                .entities
                .delete::<Workspace>(&workspace.id)
                .await?;
            info!("Workspace record deleted");
            self.shared
                .notifier
                .to_group(&workspace.id, NotificationEvent::WorkspaceDeleted, &workspace)
                .await;
            ctx.complete_activity(FINALIZE).await?;
        }
        Ok(())
    }

    async fn detach_members(&self, workspace: &Workspace) -> Result<()> {
        for member in &workspace.members {
            let detached = self
                .shared
                .mutator
                .detach_user(&member.user.id, &workspace.id)
                .await?;
            if detached.is_none() {
                warn!(user_id = %member.user.id, "Member has no user record, skipping");
                continue;
            }
            self.shared
                .notifier
                .to_user(
                    &member.user.id,
                    NotificationEvent::WorkspaceDeletedForUser,
                    &workspace.id,
                )
                .await;
        }
        info!(count = workspace.members.len(), "Members detached");
        Ok(())
    }

    /// Delete notes page by page until none remain; each page is removed
    /// concurrently.
    async fn delete_notes(&self, workspace_id: &str) -> Result<()> {
        let page = self.shared.config.note_delete_page;
        let mut total = 0;
        loop {
            let query = EntityQuery::new()
                .filter("workspace_id", workspace_id)
                .sort_by("created_at", SortDirection::Asc)
                .page(0, page);
            let notes: Vec<Note> = self.shared.entities.query(&query).await?;
            if notes.is_empty() {
                break;
            }
            total += notes.len();
            let entities = &self.shared.entities;
            try_join_all(notes.iter().map(|note| entities.delete::<Note>(&note.id))).await?;
        }
        info!(count = total, "Workspace notes deleted");
        Ok(())
    }
}

#[async_trait]
impl WorkflowHandler for DeleteWorkspaceWorkflow {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::DeleteWorkspace
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> WorkflowOutcome {
        let input: DeleteWorkspaceInput = match ctx.input() {
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
                "Delete-workspace failed"
            );
        }
        WorkflowOutcome::from_result(result)
    }
}
