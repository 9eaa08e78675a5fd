//! Error types for the commissioner

use thiserror::Error;

/// Result type alias for commissioner operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in commissioner operations
#[derive(Error, Debug)]
pub enum Error {
    /// An argument was rejected before any network traffic was sent
    #[error("invalid argument: {0}")]
    InvalidArgs(String),

    /// The operation is not allowed in the current session state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A requested value is absent (present-flag clear, or no such entry)
    #[error("not found: {0}")]
    NotFound(String),

    /// An entry with the same key is already registered
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The peer answered with a non-accept status
    #[error("request was rejected with status={status}")]
    Rejected {
        /// Numeric status carried by the State or Status TLV
        status: u8,
    },

    /// The CoAP retransmission budget was exhausted without a response
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The secure transport failed below the CoAP layer
    #[error("transport failed: {0}")]
    TransportFailed(String),

    /// Credential or token validation failed
    #[error("security error: {0}")]
    Security(String),

    /// The request was aborted by the user before completion
    #[error("request was cancelled")]
    Cancelled,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// The numeric status of a rejection, if this is one.
    pub fn rejected_status(&self) -> Option<u8> {
        match self {
            Error::Rejected { status } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_carries_status() {
        let err = Error::Rejected { status: 2 };
        assert_eq!(err.rejected_status(), Some(2));
        assert_eq!(err.to_string(), "request was rejected with status=2");
    }

    #[test]
    fn test_io_conversion() {
        fn read() -> Result<String> {
            Ok(std::fs::read_to_string("/nonexistent/commissioner.json")?)
        }
        assert!(matches!(read(), Err(Error::Io(_))));
    }
}
