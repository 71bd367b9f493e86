//! Workspace HTTP handlers: sign-in, creation from uploads, source management
//! and secure content links.

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use atrium_core::{User, Workspace};

use crate::services::UploadedFile;
use crate::{ApiError, AppState, Caller};

// =============================================================================
// REQUEST/RESPONSE TYPES
// =============================================================================

/// A workspace together with the workflow run queued for it.
#[derive(Debug, Serialize)]
pub struct WorkspaceQueuedResponse {
    pub workspace: Workspace,
    pub run_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct RunQueuedResponse {
    pub run_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct SecureUrlResponse {
    pub url: String,
}

/// Fields of a workspace upload form.
#[derive(Debug, Default)]
struct UploadForm {
    title: String,
    description: String,
    files: Vec<UploadedFile>,
}

/// Read `title`, `description` and any number of file parts.
async fn read_upload(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "title" | "description" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read {}: {}", name, e)))?;
                if name == "title" {
                    form.title = value;
                } else {
                    form.description = value;
                }
            }
            _ => {
                let Some(file_name) = field.file_name().map(|s| s.to_string()) else {
                    continue;
                };
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read file data: {}", e)))?
                    .to_vec();
                form.files.push(UploadedFile {
                    file_name,
                    content_type,
                    data,
                });
            }
        }
    }
    Ok(form)
}

// =============================================================================
// HANDLERS
// =============================================================================

/// Ensure a user record exists for the caller.
pub async fn sign_in(
    State(state): State<AppState>,
    Caller(identity): Caller,
) -> Result<Json<User>, ApiError> {
    let user = state.workspaces.sign_in(&identity).await?;
    Ok(Json(user))
}

/// Create a workspace from a multipart form and queue its provisioning.
///
/// # Returns
/// - 202 Accepted with the stored workspace and the provision run id
/// - 400 Bad Request if the title is missing or the form is malformed
pub async fn create_workspace(
    State(state): State<AppState>,
    Caller(identity): Caller,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let form = read_upload(multipart).await?;
    let queued = state
        .workspaces
        .create(&identity, &form.title, &form.description, form.files)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(WorkspaceQueuedResponse {
            workspace: queued.value,
            run_id: queued.run_id,
        }),
    ))
}

pub async fn get_workspace(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Path(id): Path<String>,
) -> Result<Json<Workspace>, ApiError> {
    let workspace = state.workspaces.get(&id, &identity).await?;
    Ok(Json(workspace))
}

/// Upload more files to an existing workspace.
pub async fn add_files(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let form = read_upload(multipart).await?;
    let queued = state.workspaces.add_files(&id, &identity, form.files).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(WorkspaceQueuedResponse {
            workspace: queued.value,
            run_id: queued.run_id,
        }),
    ))
}

pub async fn delete_source(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Path((id, index)): Path<(String, usize)>,
) -> Result<impl IntoResponse, ApiError> {
    let queued = state
        .workspaces
        .delete_source(&id, index, &identity)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(WorkspaceQueuedResponse {
            workspace: queued.value,
            run_id: queued.run_id,
        }),
    ))
}

/// Queue deletion of the whole workspace. Creator only.
pub async fn delete_workspace(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let run_id = state.workspaces.delete(&id, &identity).await?;
    Ok((StatusCode::ACCEPTED, Json(RunQueuedResponse { run_id })))
}

pub async fn secure_content_url(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Path((id, index)): Path<(String, usize)>,
) -> Result<Json<SecureUrlResponse>, ApiError> {
    let url = state
        .workspaces
        .secure_content_url(&id, index, &identity)
        .await?;
    Ok(Json(SecureUrlResponse { url }))
}
