//! Server error types.

use bazaar_core::UserId;
use bazaar_core::protocol::reasons;
use thiserror::Error;

/// Failure reported by a marketplace collaborator.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The credential was rejected.
    #[error("invalid token: {0}")]
    InvalidToken(String),
    /// The backend answered with a non-success status.
    #[error("{method} {path} returned {status}")]
    Status {
        /// HTTP method.
        method: &'static str,
        /// Request path (without base URL).
        path: String,
        /// Status code.
        status: u16,
    },
    /// Transport-level HTTP failure.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The collaborator is not reachable or not configured.
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

/// Handshake failure; the client gets one `error` envelope and is closed.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No bearer credential in the query string or headers.
    #[error("missing bearer token")]
    MissingToken,
    /// The token validator rejected the credential.
    #[error("authentication failed: {0}")]
    Unauthorized(#[source] ServiceError),
    /// The authenticated user no longer exists.
    #[error("user {0} not found")]
    UserNotFound(UserId),
    /// The user directory could not be queried.
    #[error("user lookup failed: {0}")]
    Directory(#[source] ServiceError),
}

impl SessionError {
    /// Wire `reason` carried by the `error` envelope.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingToken | Self::Unauthorized(_) => reasons::UNAUTHORIZED,
            Self::UserNotFound(_) | Self::Directory(_) => reasons::USER_NOT_FOUND,
        }
    }
}
