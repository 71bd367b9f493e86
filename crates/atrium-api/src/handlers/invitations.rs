//! Invitation HTTP handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;

use atrium_core::{Invitation, InvitationStatus, User};
use atrium_jobs::{AcceptOutcome, NewInvitation};

use crate::services::require_member;
use crate::{ApiError, AppState, Caller};

#[derive(Debug, Serialize)]
pub struct AcceptResponse {
    /// False when the invitation had already been accepted.
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

/// Invite someone to a workspace by email. Members only.
pub async fn create_invitation(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Path(workspace_id): Path<String>,
    Json(body): Json<NewInvitation>,
) -> Result<impl IntoResponse, ApiError> {
    require_member(&state.entities, &workspace_id, &identity).await?;
    let invitation = state
        .invitations
        .create(&workspace_id, &identity, body)
        .await?;
    Ok((StatusCode::CREATED, Json(invitation)))
}

/// Invitations of a workspace in the given status (`pending` or `accepted`).
pub async fn list_workspace_invitations(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Path((workspace_id, status)): Path<(String, String)>,
) -> Result<Json<Vec<Invitation>>, ApiError> {
    let status: InvitationStatus = status.parse()?;
    require_member(&state.entities, &workspace_id, &identity).await?;
    let invitations = state
        .invitations
        .for_workspace(&workspace_id, status)
        .await?;
    Ok(Json(invitations))
}

/// Pending invitations addressed to the caller's email.
pub async fn list_pending_invitations(
    State(state): State<AppState>,
    Caller(identity): Caller,
) -> Result<Json<Vec<Invitation>>, ApiError> {
    let invitations = state.invitations.pending_for_email(&identity.email).await?;
    Ok(Json(invitations))
}

pub async fn accept_invitation(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Path(id): Path<String>,
) -> Result<Json<AcceptResponse>, ApiError> {
    let response = match state.invitations.accept(&id, &identity).await? {
        AcceptOutcome::Accepted(user) => AcceptResponse {
            accepted: true,
            user: Some(user),
        },
        AcceptOutcome::AlreadyAccepted => AcceptResponse {
            accepted: false,
            user: None,
        },
    };
    Ok(Json(response))
}
