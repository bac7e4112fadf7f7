//! Error types for the engine.

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;
use wlsync_store::StoreError;
use wlsync_transport::TransportError;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for admin operations.
pub type AdminResult<T> = Result<T, AdminError>;

/// Errors raised while resolving membership or reconciling servers.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Identity store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Transport failure for one server.
    #[error("transport error on {server}: {source}")]
    Transport {
        /// Server id.
        server: String,
        /// Underlying error.
        #[source]
        source: TransportError,
    },

    /// A server's whitelist file could not be parsed or serialized.
    #[error("malformed whitelist on {server}: {message}")]
    MalformedWhitelist {
        /// Server id.
        server: String,
        /// Parser message.
        message: String,
    },

    /// A guild or name lookup failed.
    #[error("resolution failed: {0}")]
    Resolution(String),

    /// A reconciliation pass failed before touching any server.
    #[error("reconciliation pass failed: {0}")]
    PassFailed(String),

    /// The scheduler is no longer running.
    #[error("scheduler stopped")]
    SchedulerStopped,
}

impl EngineError {
    /// Wraps a transport error for `server`.
    pub fn transport(server: impl Into<String>, source: TransportError) -> Self {
        Self::Transport {
            server: server.into(),
            source,
        }
    }

    /// Returns true if the next pass may succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Transport { source, .. } => source.is_retryable(),
            EngineError::Resolution(_) | EngineError::PassFailed(_) => true,
            _ => false,
        }
    }
}

/// Errors in the configuration document.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        /// Configuration path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid JSON or has the wrong shape.
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// A server block names no file backend.
    #[error("server {0} has no file backend (local, sftp or ftp)")]
    MissingFileBackend(String),

    /// A server block names no command backend.
    #[error("server {0} has no command backend (pipe or rcon)")]
    MissingCommandBackend(String),

    /// A server block is otherwise unusable.
    #[error("server {server}: {message}")]
    InvalidServer {
        /// Server id.
        server: String,
        /// Reason.
        message: String,
    },
}

/// Outcomes of admin operations that are reported back to the caller.
#[derive(Error, Debug)]
pub enum AdminError {
    /// No Minecraft player has that name.
    #[error("Cannot find a Minecraft player by the name {0}")]
    UnknownPlayer(String),

    /// The account is already linked to the target.
    #[error("{name} ({uuid}) is already added to this user")]
    AlreadyOnUser {
        /// Player name.
        name: String,
        /// Account UUID.
        uuid: Uuid,
    },

    /// The account is linked to a different identity.
    #[error("{name} ({uuid}) is already linked to another user")]
    LinkedToOther {
        /// Player name.
        name: String,
        /// Account UUID.
        uuid: Uuid,
        /// Identity owning the account.
        owner: String,
    },

    /// The target may not link another account.
    #[error("This account is only allowed {allowed} linked minecraft account{}", plural(.allowed))]
    LinkLimit {
        /// The target's cap.
        allowed: u32,
    },

    /// The target has no linked accounts.
    #[error("Unknown user {0}")]
    UnknownUser(String),

    /// The account is not linked to the target.
    #[error("{uuid} is not linked to {id}")]
    NotLinked {
        /// Target identity.
        id: String,
        /// Account UUID.
        uuid: Uuid,
    },

    /// The argument is not a UUID.
    #[error("invalid uuid: {0}")]
    InvalidUuid(String),

    /// Anything else.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

fn plural(count: &u32) -> &'static str {
    if *count == 1 {
        ""
    } else {
        "s"
    }
}

impl From<StoreError> for AdminError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidUuid(input) => AdminError::InvalidUuid(input),
            other => AdminError::Engine(EngineError::Store(other)),
        }
    }
}
