//! Knowledge base error classification.

use atrium_core::Error;

/// Failure classes reported by the knowledge base service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KbErrorCode {
    /// Subscription or endpoint key rejected.
    AuthenticationError,
    /// Knowledge base, operation or source not found.
    NotFound,
    /// Malformed request (bad file URL, unknown entry id).
    BadArgument,
    /// Request quota exceeded.
    RateLimitExceeded,
    ServerError,
    Unknown,
}

impl KbErrorCode {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::AuthenticationError,
            404 => Self::NotFound,
            400 => Self::BadArgument,
            429 => Self::RateLimitExceeded,
            500..=599 => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimitExceeded | Self::ServerError | Self::Unknown)
    }
}

/// Convert a classified failure to an atrium Error.
pub fn to_atrium_error(code: KbErrorCode, message: &str) -> Error {
    match code {
        KbErrorCode::AuthenticationError => {
            Error::Config(format!("Knowledge base rejected credentials: {}", message))
        }
        KbErrorCode::NotFound => Error::NotFound(message.to_string()),
        KbErrorCode::BadArgument => Error::InvalidInput(message.to_string()),
        KbErrorCode::RateLimitExceeded => {
            Error::External(format!("Knowledge base rate limit exceeded: {}", message))
        }
        KbErrorCode::ServerError => {
            Error::External(format!("Knowledge base server error: {}", message))
        }
        KbErrorCode::Unknown => Error::External(message.to_string()),
    }
}
