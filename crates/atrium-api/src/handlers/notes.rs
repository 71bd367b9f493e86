//! Note HTTP handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use atrium_core::Note;

use crate::services::{AddCommentRequest, SaveNoteRequest};
use crate::{ApiError, AppState, Caller};

/// Notes of a workspace, newest first.
pub async fn list_notes(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Path(workspace_id): Path<String>,
) -> Result<Json<Vec<Note>>, ApiError> {
    let notes = state.notes.list(&workspace_id, &identity).await?;
    Ok(Json(notes))
}

/// Create or update a note.
pub async fn save_note(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Json(body): Json<SaveNoteRequest>,
) -> Result<Json<Note>, ApiError> {
    let note = state.notes.save(&identity, body).await?;
    Ok(Json(note))
}

pub async fn delete_note(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.notes.delete(&id, &identity).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_comment(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Path(id): Path<String>,
    Json(body): Json<AddCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let note = state.notes.add_comment(&id, &identity, body).await?;
    Ok((StatusCode::CREATED, Json(note)))
}
