use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error codes for programmatic handling of session errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Required configuration was missing or malformed
    Configuration,
    /// A flow method was used before `initialize`
    Initialization,
    /// No user is signed in; signing in again resolves it
    Unauthenticated,
    /// The identity service rejected an authorization callback
    Callback,
    /// A request to the identity service or resource endpoint failed
    Network,
    /// Reading or writing persisted state failed
    Storage,
}

/// Errors raised by the session layer
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Session manager has not been initialized")]
    NotInitialized,

    #[error("Authorization callback failed: {0}")]
    Callback(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{operation} failed with status {status}: {detail}")]
    Http {
        operation: &'static str,
        status: u16,
        detail: String,
    },

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No bearer token available, sign in first")]
    MissingBearerToken,
}

impl SessionError {
    /// Get the error code for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Configuration(_) | SessionError::Url(_) => ErrorKind::Configuration,
            SessionError::NotInitialized => ErrorKind::Initialization,
            SessionError::MissingBearerToken => ErrorKind::Unauthenticated,
            SessionError::Callback(_) => ErrorKind::Callback,
            SessionError::Network(_) | SessionError::Http { .. } => ErrorKind::Network,
            SessionError::Storage(_) | SessionError::Serialization(_) => ErrorKind::Storage,
        }
    }

    /// Whether the error is caused by misuse of the API rather than a remote failure.
    ///
    /// These are not recoverable locally; retrying the same call will fail again.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Configuration | ErrorKind::Initialization
        )
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::Storage(err.to_string())
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, SessionError>;
