//! Chat and question handlers. Answers arrive later over the event stream.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use uuid::Uuid;

use atrium_core::Message;

use crate::services::PostMessageRequest;
use crate::{ApiError, AppState, Caller};

#[derive(Debug, Serialize)]
pub struct QuestionQueuedResponse {
    pub message: Message,
    pub run_id: Uuid,
}

pub async fn send_chat(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Json(body): Json<PostMessageRequest>,
) -> Result<Json<Message>, ApiError> {
    let message = state.messaging.chat(&identity, body).await?;
    Ok(Json(message))
}

pub async fn ask_question(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Json(body): Json<PostMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (message, run_id) = state.messaging.ask(&identity, body).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(QuestionQueuedResponse { message, run_id }),
    ))
}
