//! Error types for store operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while loading or mutating the identity store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The store document could not be parsed or serialized.
    #[error("malformed store document: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Another process holds the store lock.
    #[error("store is locked by another process: {}", .0.display())]
    Locked(PathBuf),

    /// The UUID is already linked to a different identity.
    #[error("{uuid} is already linked to identity {owner}")]
    AlreadyLinked {
        /// The UUID being linked.
        uuid: Uuid,
        /// The identity currently owning it.
        owner: String,
    },

    /// The identity has no record in the store.
    #[error("unknown identity: {0}")]
    UnknownIdentity(String),

    /// The input is not a valid Minecraft UUID.
    #[error("invalid uuid: {0}")]
    InvalidUuid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let uuid = Uuid::nil();
        let err = StoreError::AlreadyLinked {
            uuid,
            owner: "42".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("00000000-0000-0000-0000-000000000000"));
        assert!(msg.contains("42"));

        let err = StoreError::UnknownIdentity("7".into());
        assert_eq!(err.to_string(), "unknown identity: 7");
    }
}
