//! Signed blob downloads.
//!
//! Links come from [`atrium_core::ObjectStore::signed_read_url`]; possession of
//! an unexpired link is the only authorization, so no identity headers are
//! required here.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
};
use serde::Deserialize;

use crate::{ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub expires: i64,
    pub sig: String,
}

pub async fn download_blob(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<SignedQuery>,
) -> Result<impl IntoResponse, ApiError> {
    state.signer.verify(&path, query.expires, &query.sig)?;
    let (data, content_type) = state.objects.get(&path).await?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "private, no-store".to_string()),
        ],
        data,
    ))
}
