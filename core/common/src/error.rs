//! Common error types for SkyBucket.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Top-level error type for SkyBucket operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Referenced object does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The authenticated identity lacks the required access.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Transport or backend unavailable.
    #[error("Network error: {0}")]
    Network(String),

    /// Malformed local path, reference or identifier.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Session or token handling failed.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Storage backend failure that fits no other kind.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Classify this error.
    ///
    /// I/O errors are folded into the storage-level kinds so that a missing
    /// local file reads the same as a missing remote object.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Error::Network(_) => ErrorKind::Network,
            Error::InvalidInput(_) => ErrorKind::InvalidArgument,
            Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Error::Authentication(_) => ErrorKind::PermissionDenied,
            Error::Storage(_) | Error::Serialization(_) => ErrorKind::Internal,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorKind::NotFound,
                std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
                std::io::ErrorKind::InvalidInput | std::io::ErrorKind::InvalidData => {
                    ErrorKind::InvalidArgument
                }
                std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::NotConnected
                | std::io::ErrorKind::TimedOut => ErrorKind::Network,
                _ => ErrorKind::Internal,
            },
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Coarse error classification, stable across backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    Network,
    InvalidArgument,
    AlreadyExists,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::Network => "network",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
