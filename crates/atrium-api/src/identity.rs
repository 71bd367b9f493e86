//! Caller identity extraction.
//!
//! Authentication happens in front of this service; the gateway forwards the
//! verified caller as `X-User-Id`, `X-User-Email`, `X-User-First-Name` and
//! `X-User-Last-Name` headers.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};

use atrium_core::Identity;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const USER_FIRST_NAME_HEADER: &str = "x-user-first-name";
pub const USER_LAST_NAME_HEADER: &str = "x-user-last-name";

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct Caller(pub Identity);

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read the forwarded identity headers. Id and email are required.
pub fn identity_from_headers(headers: &HeaderMap) -> Result<Identity, ApiError> {
    let id = header(headers, USER_ID_HEADER)
        .ok_or_else(|| ApiError::Unauthenticated("missing X-User-Id header".to_string()))?;
    let email = header(headers, USER_EMAIL_HEADER)
        .ok_or_else(|| ApiError::Unauthenticated("missing X-User-Email header".to_string()))?;
    Ok(Identity {
        id,
        email,
        first_name: header(headers, USER_FIRST_NAME_HEADER).unwrap_or_default(),
        last_name: header(headers, USER_LAST_NAME_HEADER).unwrap_or_default(),
    })
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        identity_from_headers(&parts.headers).map(Caller)
    }
}
