//! Server-sent notification stream and workspace group membership.

use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Sse,
    },
};
use tokio_stream::StreamExt as _;

use atrium_core::{defaults, NotificationEnvelope};

use crate::{ApiError, AppState, Caller};

/// Stream notifications addressed to the caller or to a group they joined.
///
/// Group membership is evaluated per notification, so joining a group takes
/// effect on an open stream.
pub async fn sse_events(
    State(state): State<AppState>,
    Caller(identity): Caller,
) -> Sse<impl futures::Stream<Item = Result<Event, std::convert::Infallible>>> {
    let rx = state.hub.subscribe();
    let groups = state.realtime.groups().clone();
    let user_id = identity.id;

    let stream = tokio_stream::wrappers::BroadcastStream::new(rx).filter_map(
        move |result: Result<NotificationEnvelope, _>| match result {
            Ok(envelope) if groups.delivers_to(&user_id, &envelope) => {
                match serde_json::to_string(&envelope) {
                    Ok(json) => Some(Ok(Event::default()
                        .event(envelope.event.as_str())
                        .id(envelope.notification_id.to_string())
                        .data(json))),
                    Err(_) => None,
                }
            }
            // Skip other recipients and lagged/closed errors
            _ => None,
        },
    );

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(defaults::SSE_KEEPALIVE_SECS))
            .text("keepalive"),
    )
}

pub async fn join_group(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Path(workspace_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.realtime.join(&workspace_id, &identity).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn leave_group(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Path(workspace_id): Path<String>,
) -> impl IntoResponse {
    state.realtime.leave(&workspace_id, &identity);
    StatusCode::NO_CONTENT
}
