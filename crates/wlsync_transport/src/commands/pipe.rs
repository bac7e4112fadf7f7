//! Command pipe backend.
//!
//! The server console reads commands line by line from a named pipe (or a
//! plain file that a wrapper script tails).

use super::CommandChannel;
use crate::error::{TransportError, TransportResult};
use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

/// Default bound on writing one batch.
pub const DEFAULT_PIPE_TIMEOUT: Duration = Duration::from_secs(5);

/// One writer lock per pipe, shared by every channel in the process.
static PIPE_LOCKS: LazyLock<SyncMutex<HashMap<PathBuf, Arc<Mutex<()>>>>> =
    LazyLock::new(|| SyncMutex::new(HashMap::new()));

fn default_timeout_ms() -> u64 {
    DEFAULT_PIPE_TIMEOUT.as_millis() as u64
}

/// Canonical form of `path`, also for a pipe that does not exist yet.
fn lock_key(path: &Path) -> PathBuf {
    if let Ok(path) = std::fs::canonicalize(path) {
        return path;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => std::fs::canonicalize(parent)
            .map(|parent| parent.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}

fn lock_for(path: &Path) -> Arc<Mutex<()>> {
    Arc::clone(
        PIPE_LOCKS
            .lock()
            .entry(lock_key(path))
            .or_insert_with(|| Arc::new(Mutex::new(()))),
    )
}

/// Parameters of the pipe backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipeParams {
    /// Path of the pipe.
    pub path: PathBuf,
    /// Bound on writing one batch, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl PipeParams {
    /// Creates parameters with the default timeout.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout_ms: default_timeout_ms(),
        }
    }

    /// Sets the batch timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }
}

/// Appends commands, one per line, to a pipe.
///
/// Batches to the same pipe never interleave, even across channels. A batch
/// that cannot be written within the timeout fails as a whole, though some
/// of its lines may already have been delivered. Waiting for another
/// writer counts against the timeout.
///
/// A FIFO is opened without blocking, so one that nobody reads fails at
/// once instead of parking a thread.
#[derive(Debug)]
pub struct PipeChannel {
    path: PathBuf,
    timeout: Duration,
    lock: Arc<Mutex<()>>,
}

impl PipeChannel {
    /// Creates a channel from `params`.
    pub fn new(params: &PipeParams) -> Self {
        Self {
            path: params.path.clone(),
            timeout: Duration::from_millis(params.timeout_ms),
            lock: lock_for(&params.path),
        }
    }

    async fn append(&self, payload: &[u8]) -> std::io::Result<()> {
        let _guard = self.lock.lock().await;
        let mut pipe = open_writer(&self.path).await?;
        pipe.write_all(payload).await?;
        pipe.flush().await
    }
}

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

#[cfg(unix)]
async fn open_writer(path: &Path) -> std::io::Result<Writer> {
    use std::os::unix::fs::FileTypeExt;

    let is_fifo = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata.file_type().is_fifo(),
        Err(_) => false,
    };
    if is_fifo {
        // ENXIO right away when no reader is attached
        let sender = tokio::net::unix::pipe::OpenOptions::new().open_sender(path)?;
        return Ok(Box::new(sender));
    }
    open_file(path).await
}

#[cfg(not(unix))]
async fn open_writer(path: &Path) -> std::io::Result<Writer> {
    open_file(path).await
}

async fn open_file(path: &Path) -> std::io::Result<Writer> {
    let file = tokio::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .await?;
    Ok(Box::new(file))
}

#[async_trait]
impl CommandChannel for PipeChannel {
    fn describe(&self) -> String {
        format!("pipe://{}", self.path.display())
    }

    async fn run_commands(&self, commands: &[String]) -> TransportResult<Vec<String>> {
        let payload: String = commands.iter().map(|c| format!("{c}\n")).collect();
        debug!(pipe = %self.path.display(), count = commands.len(), "writing commands");

        tokio::time::timeout(self.timeout, self.append(payload.as_bytes()))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))??;

        Ok(Vec::new())
    }
}
