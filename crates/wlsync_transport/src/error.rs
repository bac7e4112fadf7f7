//! Error types for transports.

use std::time::Duration;
use thiserror::Error;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors raised by file and command backends.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Local I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Could not reach the remote endpoint.
    #[error("cannot connect to {endpoint}: {message}")]
    Connect {
        /// `host:port` of the endpoint.
        endpoint: String,
        /// Error message.
        message: String,
    },

    /// The remote endpoint rejected our credentials.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The remote side reported an error for an otherwise valid request.
    #[error("remote error: {0}")]
    Remote(String),

    /// The remote side sent something we cannot interpret.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The operation did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The backend parameters are unusable.
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),

    /// A blocking worker failed.
    #[error("worker task failed: {0}")]
    Task(String),
}

impl TransportError {
    pub(crate) fn connect(endpoint: impl Into<String>, message: impl ToString) -> Self {
        Self::Connect {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    /// Returns true if retrying later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Io(_)
                | TransportError::Connect { .. }
                | TransportError::Remote(_)
                | TransportError::Timeout(_)
        )
    }
}

impl From<tokio::task::JoinError> for TransportError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(TransportError::connect("h:1", "refused").is_retryable());
        assert!(TransportError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(!TransportError::Authentication("bad password".into()).is_retryable());
        assert!(!TransportError::InvalidConfig("no auth".into()).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = TransportError::connect("mc.example.com:25575", "connection refused");
        assert_eq!(
            err.to_string(),
            "cannot connect to mc.example.com:25575: connection refused"
        );
        let err = TransportError::Timeout(Duration::from_secs(5));
        assert_eq!(err.to_string(), "timed out after 5s");
    }
}
