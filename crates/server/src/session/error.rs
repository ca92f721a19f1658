//! Error types for session and ledger operations.

use thiserror::Error;
use tokenscope::error::{PricingError, ProviderError};

/// Errors that can occur while tracking sessions and events.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No session exists for the referenced token.
    #[error("session not found: {0}")]
    NotFound(String),

    /// A session with this token already exists.
    #[error("session token already exists: {0}")]
    Conflict(String),

    /// The session exists but has been deactivated.
    #[error("session is not active: {0}")]
    Inactive(String),

    /// The durable layer failed or is unavailable.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization of stored data failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The upstream model call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The cost model could not price the invocation.
    #[error(transparent)]
    RateUnknown(#[from] PricingError),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

/// Convenience alias for results carrying a [`SessionError`].
pub type SessionResult<T> = Result<T, SessionError>;

impl From<rusqlite::Error> for SessionError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, message)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                SessionError::Conflict(
                    message
                        .clone()
                        .unwrap_or_else(|| "unique constraint violated".to_string()),
                )
            }
            _ => SessionError::Storage(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Serialization(err.to_string())
    }
}
