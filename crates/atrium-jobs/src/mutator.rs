//! Two-sided user ↔ workspace membership edits.
//!
//! The user side is written first, then the workspace side. The two writes
//! are not transactional; both are guarded by existence checks, so running
//! the same edit again converges on the same records.
//!
//! A workspace in `Deleting` accepts no new members. If it enters that state
//! between the two writes, the user side is rolled back.

use tracing::{info, instrument, warn};

use atrium_core::{
    EntityRelation, EntityStore, Error, Result, User, Workspace, WorkspaceStatus,
};

/// Applies membership changes to both sides of the relationship.
#[derive(Clone)]
pub struct MembershipMutator {
    entities: EntityStore,
}

impl MembershipMutator {
    pub fn new(entities: EntityStore) -> Self {
        Self { entities }
    }

    /// Ensure the user lists the workspace and the workspace lists the user.
    ///
    /// `relation.parent` is the user, `relation.embedded` the workspace.
    /// Returns the updated user; callers notify afterwards.
    #[instrument(
        skip(self, relation),
        fields(subsystem = "jobs", component = "mutator", user_id = %relation.parent.id, workspace_id = %relation.embedded.id)
    )]
    pub async fn connect(&self, relation: &EntityRelation) -> Result<User> {
        let workspace_id = relation.embedded.id.as_str();
        let current: Workspace = self.entities.require(workspace_id).await?;
        if current.status == WorkspaceStatus::Deleting {
            return Err(deleting(workspace_id));
        }

        let workspace_ref = relation.embedded.clone();
        let user: User = self
            .entities
            .update(&relation.parent.id, |user: &mut User| {
                Ok(user.add_workspace(workspace_ref.clone()))
            })
            .await?;

        let member_ref = user.reference();
        let joined = self
            .entities
            .update(workspace_id, |ws: &mut Workspace| {
                if ws.status == WorkspaceStatus::Deleting {
                    return Err(deleting(&ws.id));
                }
                Ok(ws.add_member(member_ref.clone()))
            })
            .await;
        let workspace: Workspace = match joined {
            Ok(workspace) => workspace,
            Err(e @ (Error::InvalidInput(_) | Error::NotFound(_))) => {
                warn!(error = %e, "Workspace went away mid-connect, rolling back user side");
                self.detach_user(&user.id, workspace_id).await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        info!(
            member_count = workspace.members.len(),
            workspace_count = user.workspaces.len(),
            "User and workspace connected"
        );
        Ok(user)
    }

    /// Remove the workspace reference from one user. A missing user is not
    /// an error; returns the user when one exists.
    pub async fn detach_user(&self, user_id: &str, workspace_id: &str) -> Result<Option<User>> {
        if self.entities.get::<User>(user_id).await?.is_none() {
            return Ok(None);
        }
        let user: User = self
            .entities
            .update(user_id, |user: &mut User| Ok(user.remove_workspace(workspace_id)))
            .await?;
        Ok(Some(user))
    }

    /// Remove both sides of the relationship.
    pub async fn disconnect(&self, user_id: &str, workspace_id: &str) -> Result<()> {
        self.detach_user(user_id, workspace_id).await?;
        if self.entities.get::<Workspace>(workspace_id).await?.is_some() {
            self.entities
                .update(workspace_id, |ws: &mut Workspace| Ok(ws.remove_member(user_id)))
                .await?;
        }
        Ok(())
    }
}

fn deleting(workspace_id: &str) -> Error {
    Error::InvalidInput(format!("workspace {} is being deleted", workspace_id))
}
