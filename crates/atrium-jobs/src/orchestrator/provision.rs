//! Provision: ingest `Publishing` sources into the knowledge base, tag their
//! entries with the source and workspace, publish, and mark them `Published`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use atrium_core::{
    defaults, KbEntryUpdate, KbFile, KbUpdate, MetadataPair, NotificationEvent, Result,
    SourceStatus, WorkflowKind, Workspace, WorkspaceStatus,
};

use super::Shared;
use crate::handler::{WorkflowContext, WorkflowHandler, WorkflowOutcome};

const UPDATE_KB_SOURCES: &str = "update_kb_sources";
const AWAIT_SOURCES: &str = "await_sources";
const UPDATE_METADATA: &str = "update_metadata";
const AWAIT_METADATA: &str = "await_metadata";
const PUBLISH: &str = "publish";

/// Input of a provision run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionInput {
    pub workspace_id: String,
    /// Storage paths of the sources this run ingests.
    pub source_paths: Vec<String>,
}

pub struct ProvisionWorkflow {
    shared: Arc<Shared>,
}

impl ProvisionWorkflow {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    #[instrument(
        skip(self, ctx, input),
        fields(subsystem = "jobs", component = "orchestrator", op = "provision", workflow_id = %ctx.run_id(), workspace_id = %input.workspace_id)
    )]
    async fn run(&self, ctx: &mut WorkflowContext, input: &ProvisionInput) -> Result<()> {
        if !ctx.is_done(UPDATE_KB_SOURCES) {
            let update = self.source_files(input).await?;
            self.shared
                .submit_update(ctx, UPDATE_KB_SOURCES, update)
                .await?;
        }
        if !ctx.is_done(AWAIT_SOURCES) {
            self.shared
                .await_update(ctx, UPDATE_KB_SOURCES, AWAIT_SOURCES)
                .await?;
        }
        if !ctx.is_done(UPDATE_METADATA) {
            let update = self.metadata_tags(input).await?;
            self.shared.submit_update(ctx, UPDATE_METADATA, update).await?;
        }
        if !ctx.is_done(AWAIT_METADATA) {
            self.shared
                .await_update(ctx, UPDATE_METADATA, AWAIT_METADATA)
                .await?;
        }
        if !ctx.is_done(PUBLISH) {
            self.publish(input).await?;
            ctx.complete_activity(PUBLISH).await?;
        }
        Ok(())
    }

    /// Scoped sources still awaiting ingestion, in workspace order.
    async fn pending_sources(&self, input: &ProvisionInput) -> Result<Workspace> {
        let mut workspace: Workspace = self.shared.entities.require(&input.workspace_id).await?;
        workspace.sources.retain(|s| {
            s.status == SourceStatus::Publishing && input.source_paths.contains(&s.storage_path)
        });
        Ok(workspace)
    }

    async fn source_files(&self, input: &ProvisionInput) -> Result<KbUpdate> {
        let workspace = self.pending_sources(input).await?;
        let ttl = self.shared.config.provision_url_ttl;
        let files = workspace
            .sources
            .iter()
            .map(|source| {
                Ok(KbFile {
                    file_name: source.kb_source_name().to_string(),
                    file_uri: self.shared.objects.signed_read_url(&source.storage_path, ttl)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(KbUpdate::add_files(files))
    }

    /// Tag every entry of the scoped sources with its source name and the
    /// workspace id. Entries already carrying both tags are left alone.
    async fn metadata_tags(&self, input: &ProvisionInput) -> Result<KbUpdate> {
        let workspace = self.pending_sources(input).await?;
        let kb_id = &self.shared.config.kb_id;
        let mut edits = Vec::new();
        for source in &workspace.sources {
            let name = source.kb_source_name();
            let tags = vec![
                MetadataPair::new(defaults::KB_SOURCE_TAG, name),
                MetadataPair::new(defaults::KB_WORKSPACE_TAG, workspace.id.as_str()),
            ];
            for entry in self.shared.kb.download_entries(kb_id, name).await? {
                if tags.iter().all(|t| entry.metadata.contains(t)) {
                    continue;
                }
                edits.push(KbEntryUpdate {
                    id: entry.id,
                    add_metadata: tags.clone(),
                    delete_metadata: Vec::new(),
                });
            }
        }
        info!(entry_count = edits.len(), "Metadata tags prepared");
        Ok(KbUpdate::update_entries(edits))
    }

    async fn publish(&self, input: &ProvisionInput) -> Result<()> {
        self.shared.kb.publish(&self.shared.config.kb_id).await?;

        let mut first_publish = false;
        let mut changed = false;
        let workspace: Workspace = self
            .shared
            .entities
            .update(&input.workspace_id, |ws: &mut Workspace| {
                changed = false;
                for source in ws.sources.iter_mut() {
                    if source.status == SourceStatus::Publishing
                        && input.source_paths.contains(&source.storage_path)
                    {
                        source.status = SourceStatus::Published;
                        changed = true;
                    }
                }
                first_publish = ws.status == WorkspaceStatus::Provisioning;
                if first_publish {
                    ws.status = WorkspaceStatus::Published;
                    changed = true;
                }
                Ok(changed)
            })
            .await?;

        if !changed {
            info!("Nothing left to publish");
            return Ok(());
        }

        info!(
            first_publish,
            source_count = workspace.sources.len(),
            "Workspace published"
        );
        if first_publish {
            self.shared
                .notifier
                .to_user(
                    &workspace.created_by.id,
                    NotificationEvent::WorkspaceDocumentsProvisioned,
                    &workspace,
                )
                .await;
        } else {
            self.shared
                .notifier
                .to_group(
                    &workspace.id,
                    NotificationEvent::WorkspaceDocumentsAdded,
                    &workspace,
                )
                .await;
        }
        Ok(())
    }
}

#[async_trait]
impl WorkflowHandler for ProvisionWorkflow {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::Provision
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> WorkflowOutcome {
        let input: ProvisionInput = match ctx.input() {
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
                "Provision failed"
            );
        }
        WorkflowOutcome::from_result(result)
    }
}
