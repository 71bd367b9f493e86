//! HTTP error mapping.

use axum::{http::StatusCode, response::IntoResponse, Json};
use tracing::error;

/// Error returned by request handlers.
#[derive(Debug)]
pub enum ApiError {
    /// Anything without a more specific status; logged and reported as 500.
    Internal(atrium_core::Error),
    /// No caller identity on the request.
    Unauthenticated(String),
    Forbidden(String),
    NotFound(String),
    BadRequest(String),
    Conflict(String),
}

impl From<atrium_core::Error> for ApiError {
    fn from(err: atrium_core::Error) -> Self {
        match err {
            atrium_core::Error::NotFound(msg) => ApiError::NotFound(msg),
            atrium_core::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            atrium_core::Error::Unauthorized(msg) => ApiError::Forbidden(msg),
            atrium_core::Error::Conflict(msg) => ApiError::Conflict(msg),
            other => ApiError::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::Internal(err) => {
                error!(subsystem = "api", error = %err, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            ApiError::Unauthenticated(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrium_core::Error;

    fn status_of(err: Error) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_core_errors_map_to_statuses() {
        assert_eq!(
            status_of(Error::not_found("workspace", "ws-1")),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(Error::Unauthorized("email mismatch".into())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(Error::InvalidInput("no files".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(Error::Conflict("revision 3".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(Error::External("503".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_missing_identity_is_401() {
        let response = ApiError::Unauthenticated("missing X-User-Id".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
