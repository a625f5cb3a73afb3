//! Common error types for pdvbackup.

use thiserror::Error;

/// Top-level error type for backup client operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No usable credential, or the remote rejected the one we have.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Transport failure or unexpected status from the remote API.
    #[error("Network error: {0}")]
    Network(String),

    /// Remote or local resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Remote refused access to the resource.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Storage bookkeeping failed (token store, credentials file).
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Authentication("no access token".to_string());
        assert_eq!(err.to_string(), "Authentication error: no access token");
    }

    #[test]
    fn test_json_error_conversion() {
        let parsed: std::result::Result<serde_json::Value, _> = serde_json::from_str("{nope");
        let err: Error = parsed.unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
