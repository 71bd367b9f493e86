//! Error types for atrium.

use thiserror::Error;

/// Result type alias using atrium's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for atrium operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Referenced workspace, user, note or invitation is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Identity or email mismatch on workspace access or invitation acceptance
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Conditional write lost against a concurrent writer
    #[error("Revision conflict: {0}")]
    Conflict(String),

    /// External store, blob or knowledge base call failed transiently
    #[error("External service error: {0}")]
    External(String),

    /// The knowledge base reported a terminal failed operation
    #[error("Operation {operation_id} failed: {message}")]
    OperationFailed {
        operation_id: String,
        message: String,
    },

    /// Poll loop exhausted without a terminal operation state
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Blob storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Workflow run bookkeeping failed
    #[error("Workflow error: {0}")]
    Workflow(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a caller may retry the failed call within its own budget.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::External(_)
                | Error::Request(_)
                | Error::Database(_)
                | Error::Io(_)
                | Error::Conflict(_)
        )
    }

    /// Shorthand for a missing entity of the given kind.
    pub fn not_found(kind: &str, id: &str) -> Self {
        Error::NotFound(format!("{} {}", kind, id))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
