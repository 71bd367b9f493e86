//! Workspace service: creation with uploads, membership-guarded reads and the
//! request side of the orchestrator workflows.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use atrium_core::{
    new_entity_id, ContentSource, EntityRelation, EntityStore, Error, Identity, Member,
    ObjectStore, Result, SourceStatus, User, Workspace, WorkspaceStatus,
};
use atrium_jobs::WorkspaceOrchestrator;

/// A file received in a multipart upload.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Blob path for a new upload: `workspaces/{id}/sources/{uuid}{ext}`.
pub fn source_blob_path(workspace_id: &str, file_name: &str) -> String {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default();
    format!("workspaces/{}/sources/{}{}", workspace_id, Uuid::new_v4(), ext)
}

/// Load a workspace the caller belongs to.
pub async fn require_member(
    entities: &EntityStore,
    workspace_id: &str,
    identity: &Identity,
) -> Result<Workspace> {
    let workspace: Workspace = entities.require(workspace_id).await?;
    if !workspace.has_member(&identity.id) {
        return Err(Error::Unauthorized(format!(
            "no access to workspace {}",
            workspace_id
        )));
    }
    Ok(workspace)
}

/// Result of a request that queued a workflow.
#[derive(Debug, Clone)]
pub struct Queued<T> {
    pub value: T,
    pub run_id: Uuid,
}

#[derive(Clone)]
pub struct WorkspaceService {
    entities: EntityStore,
    objects: Arc<dyn ObjectStore>,
    orchestrator: WorkspaceOrchestrator,
    secure_url_ttl: Duration,
}

impl WorkspaceService {
    pub fn new(
        entities: EntityStore,
        objects: Arc<dyn ObjectStore>,
        orchestrator: WorkspaceOrchestrator,
        secure_url_ttl: Duration,
    ) -> Self {
        Self {
            entities,
            objects,
            orchestrator,
            secure_url_ttl,
        }
    }

    /// Make sure a user record exists for a signed-in identity.
    #[instrument(skip(self, identity), fields(subsystem = "api", component = "workspaces", user_id = %identity.id))]
    pub async fn sign_in(&self, identity: &Identity) -> Result<User> {
        if let Some(user) = self.entities.get::<User>(&identity.id).await? {
            return Ok(user);
        }
        match self.entities.upsert(&User::from_identity(identity)).await {
            Ok(user) => {
                info!("User record created");
                Ok(user)
            }
            // Lost an insert race with a concurrent sign-in.
            Err(Error::Conflict(_)) => self.entities.require(&identity.id).await,
            Err(e) => Err(e),
        }
    }

    async fn store_files(
        &self,
        workspace_id: &str,
        added_by: &str,
        files: Vec<UploadedFile>,
    ) -> Result<Vec<ContentSource>> {
        let mut sources = Vec::with_capacity(files.len());
        for file in files {
            let path = source_blob_path(workspace_id, &file.file_name);
            if let Err(e) = self
                .objects
                .put(&path, &file.data, &file.content_type)
                .await
            {
                self.discard_blobs(&sources).await;
                return Err(e);
            }
            sources.push(ContentSource {
                display_name: file.file_name.clone(),
                original_file_name: file.file_name,
                storage_path: path,
                added_by_id: added_by.to_string(),
                added_at: Utc::now(),
                status: SourceStatus::Publishing,
            });
        }
        Ok(sources)
    }

    /// Best-effort removal of blobs stored for a request that then failed.
    async fn discard_blobs(&self, sources: &[ContentSource]) {
        for source in sources {
            if let Err(e) = self.objects.delete_if_exists(&source.storage_path).await {
                warn!(path = %source.storage_path, error = %e, "Failed to discard orphaned blob");
            }
        }
    }

    /// Create a workspace from uploaded files and queue its provisioning.
    ///
    /// The creator is the first member; their user record is linked by a
    /// queued connect-member run.
    #[instrument(skip(self, creator, description, files), fields(subsystem = "api", component = "workspaces", user_id = %creator.id, file_count = files.len()))]
    pub async fn create(
        &self,
        creator: &Identity,
        name: &str,
        description: &str,
        files: Vec<UploadedFile>,
    ) -> Result<Queued<Workspace>> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("workspace title is required".to_string()));
        }
        self.sign_in(creator).await?;

        let id = new_entity_id();
        let mut workspace = Workspace::new(id.clone(), name, description, creator.reference());
        workspace.sources = self.store_files(&id, &creator.id, files).await?;
        workspace.members.push(Member {
            user: creator.reference(),
            joined_at: Utc::now(),
        });
        let workspace = self.entities.upsert(&workspace).await?;
        info!(workspace_id = %workspace.id, "Workspace created");

        self.orchestrator
            .start_connect_member(&EntityRelation::new(
                creator.reference(),
                workspace.reference(),
            ))
            .await?;
        let run_id = self.orchestrator.start_provision(&workspace).await?;
        Ok(Queued {
            value: workspace,
            run_id,
        })
    }

    pub async fn get(&self, workspace_id: &str, identity: &Identity) -> Result<Workspace> {
        require_member(&self.entities, workspace_id, identity).await
    }

    /// Store more files and queue provisioning of just those.
    #[instrument(skip(self, identity, files), fields(subsystem = "api", component = "workspaces", file_count = files.len()))]
    pub async fn add_files(
        &self,
        workspace_id: &str,
        identity: &Identity,
        files: Vec<UploadedFile>,
    ) -> Result<Queued<Workspace>> {
        let workspace = require_member(&self.entities, workspace_id, identity).await?;
        if workspace.status == WorkspaceStatus::Deleting {
            return Err(Error::InvalidInput(format!(
                "workspace {} is being deleted",
                workspace_id
            )));
        }
        if files.is_empty() {
            return Err(Error::InvalidInput("no files to add".to_string()));
        }
        let sources = self.store_files(workspace_id, &identity.id, files).await?;
        let (workspace, run_id) = match self
            .orchestrator
            .start_add_source(workspace_id, sources.clone())
            .await
        {
            Ok(started) => started,
            Err(e) => {
                // Sources the workspace already lists keep their blobs.
                let current = self
                    .entities
                    .get::<Workspace>(workspace_id)
                    .await
                    .ok()
                    .flatten();
                let orphans: Vec<ContentSource> = sources
                    .into_iter()
                    .filter(|s| {
                        current
                            .as_ref()
                            .map_or(true, |ws| ws.source_by_path(&s.storage_path).is_none())
                    })
                    .collect();
                self.discard_blobs(&orphans).await;
                return Err(e);
            }
        };
        Ok(Queued {
            value: workspace,
            run_id,
        })
    }

    pub async fn delete_source(
        &self,
        workspace_id: &str,
        index: usize,
        identity: &Identity,
    ) -> Result<Queued<Workspace>> {
        require_member(&self.entities, workspace_id, identity).await?;
        let (workspace, run_id) = self
            .orchestrator
            .start_delete_source(workspace_id, index)
            .await?;
        Ok(Queued {
            value: workspace,
            run_id,
        })
    }

    /// Only the creator may delete a workspace.
    pub async fn delete(&self, workspace_id: &str, identity: &Identity) -> Result<Uuid> {
        let workspace: Workspace = self.entities.require(workspace_id).await?;
        if !workspace.is_creator(&identity.id) {
            return Err(Error::Unauthorized(format!(
                "only the creator may delete workspace {}",
                workspace_id
            )));
        }
        self.orchestrator.start_delete_workspace(workspace_id).await
    }

    /// Short-lived read URL for the source at `index`.
    pub async fn secure_content_url(
        &self,
        workspace_id: &str,
        index: usize,
        identity: &Identity,
    ) -> Result<String> {
        let workspace = require_member(&self.entities, workspace_id, identity).await?;
        let source = workspace.sources.get(index).ok_or_else(|| {
            Error::NotFound(format!("source {} of workspace {}", index, workspace_id))
        })?;
        self.objects
            .signed_read_url(&source.storage_path, self.secure_url_ttl)
    }
}
