//! Invitation flow: pending invitations addressed by email, accepted once.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use atrium_core::{
    defaults, new_entity_id, normalize_email, EntityQuery, EntityRelation, EntityStore, Error,
    Identity, Invitation, InvitationDelivery, InvitationStatus, NotificationEvent, Result,
    SortDirection, User, Workspace,
};

use crate::mutator::MembershipMutator;
use crate::notifier::Notifier;

/// Caller-supplied fields of a new invitation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewInvitation {
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub message: String,
}

/// Result of accepting an invitation.
#[derive(Debug, Clone, PartialEq)]
pub enum AcceptOutcome {
    /// The invitation moved to `Accepted`; carries the connected user.
    Accepted(User),
    /// The invitation was already accepted; membership was re-applied.
    AlreadyAccepted,
}

/// Creates and accepts workspace invitations.
#[derive(Clone)]
pub struct InvitationFlow {
    entities: EntityStore,
    mutator: MembershipMutator,
    notifier: Notifier,
    delivery: Arc<dyn InvitationDelivery>,
}

impl InvitationFlow {
    pub fn new(
        entities: EntityStore,
        mutator: MembershipMutator,
        notifier: Notifier,
        delivery: Arc<dyn InvitationDelivery>,
    ) -> Self {
        Self {
            entities,
            mutator,
            notifier,
            delivery,
        }
    }

    /// Record a pending invitation, deliver it, and notify the invitee if
    /// they already have an account.
    #[instrument(
        skip(self, inviter, request),
        fields(subsystem = "jobs", component = "invitations", inviter_id = %inviter.id)
    )]
    pub async fn create(
        &self,
        workspace_id: &str,
        inviter: &Identity,
        request: NewInvitation,
    ) -> Result<Invitation> {
        let email = normalize_email(&request.email);
        if email.is_empty() || !email.contains('@') {
            return Err(Error::InvalidInput(format!(
                "invalid invitation email: {}",
                request.email
            )));
        }
        let workspace: Workspace = self.entities.require(workspace_id).await?;

        let invitation = Invitation {
            id: new_entity_id(),
            workspace_id: workspace.id.clone(),
            display_name: workspace.name.clone(),
            email: email.clone(),
            first_name: request.first_name,
            last_name: request.last_name,
            message: request.message,
            invited_by: inviter.reference(),
            created_at: Utc::now(),
            status: InvitationStatus::Pending,
            accepted_at: None,
            revision: 0,
        };
        let invitation = self.entities.upsert(&invitation).await?;
        info!(invitation_id = %invitation.id, "Invitation created");

        if let Err(e) = self.delivery.deliver(&invitation).await {
            warn!(invitation_id = %invitation.id, error = %e, "Invitation delivery failed");
        }

        let existing: Option<User> = self
            .entities
            .find_one(EntityQuery::new().filter("email", email.as_str()))
            .await?;
        if let Some(user) = existing {
            self.notifier
                .to_user(&user.id, NotificationEvent::UserInvitedToWorkspace, &invitation)
                .await;
        }
        Ok(invitation)
    }

    /// Accept an invitation as `identity`.
    ///
    /// The identity's email must match the invitation's, ignoring case.
    /// Accepting again re-applies the membership edit, which repairs a
    /// connection interrupted after the status change, but does not notify.
    #[instrument(
        skip(self, identity),
        fields(subsystem = "jobs", component = "invitations", user_id = %identity.id)
    )]
    pub async fn accept(&self, invitation_id: &str, identity: &Identity) -> Result<AcceptOutcome> {
        let invitation: Invitation = self.entities.require(invitation_id).await?;
        if !identity.email_matches(&invitation.email) {
            return Err(Error::Unauthorized(format!(
                "invitation {} is addressed to another email",
                invitation_id
            )));
        }

        let mut transitioned = false;
        if invitation.status == InvitationStatus::Pending {
            self.entities
                .update(invitation_id, |inv: &mut Invitation| {
                    transitioned = inv.status == InvitationStatus::Pending;
                    if transitioned {
                        inv.status = InvitationStatus::Accepted;
                        inv.accepted_at = Some(Utc::now());
                    }
                    Ok(transitioned)
                })
                .await?;
        }

        let user = match self.entities.get::<User>(&identity.id).await? {
            Some(user) => user,
            None => self.entities.upsert(&User::from_identity(identity)).await?,
        };
        let workspace: Workspace = self.entities.require(&invitation.workspace_id).await?;
        let relation = EntityRelation::new(user.reference(), workspace.reference());
        let user = self.mutator.connect(&relation).await?;

        if !transitioned {
            info!(workspace_id = %workspace.id, "Invitation already accepted, membership ensured");
            return Ok(AcceptOutcome::AlreadyAccepted);
        }
        self.notifier
            .to_user(
                &user.id,
                NotificationEvent::UserAcceptInvitation,
                &workspace.reference(),
            )
            .await;
        info!(workspace_id = %workspace.id, "Invitation accepted");
        Ok(AcceptOutcome::Accepted(user))
    }

    /// Pending invitations addressed to `email`, oldest first.
    pub async fn pending_for_email(&self, email: &str) -> Result<Vec<Invitation>> {
        let query = EntityQuery::new()
            .filter("email", normalize_email(email))
            .filter("status", InvitationStatus::Pending.as_str())
            .sort_by("created_at", SortDirection::Asc)
            .page(0, defaults::INVITATION_LIST_LIMIT);
        self.entities.query(&query).await
    }

    /// Invitations of a workspace in `status`, oldest first.
    pub async fn for_workspace(
        &self,
        workspace_id: &str,
        status: InvitationStatus,
    ) -> Result<Vec<Invitation>> {
        let query = EntityQuery::new()
            .filter("workspace_id", workspace_id)
            .filter("status", status.as_str())
            .sort_by("created_at", SortDirection::Asc)
            .page(0, defaults::INVITATION_LIST_LIMIT);
        self.entities.query(&query).await
    }
}

/// Delivery that only records the invitation in the log.
#[derive(Debug, Clone, Default)]
pub struct LoggingInvitationDelivery;

#[async_trait]
impl InvitationDelivery for LoggingInvitationDelivery {
    async fn deliver(&self, invitation: &Invitation) -> Result<()> {
        info!(
            subsystem = "jobs",
            component = "invitations",
            invitation_id = %invitation.id,
            workspace_id = %invitation.workspace_id,
            email = %invitation.email,
            "Invitation delivered"
        );
        Ok(())
    }
}
