//! Remote file access.

pub mod ftp;
pub mod local;
pub mod sftp;

use crate::error::TransportResult;
use async_trait::async_trait;

/// Read and write access to files beneath a server's root directory.
///
/// `name` is always resolved beneath the configured root, so a backend
/// never touches anything outside of it.
///
/// # Implementors
///
/// - [`super::LocalFiles`] - a directory on this machine
/// - [`super::SftpFiles`] - one SSH connection per call
/// - [`super::FtpFiles`] - one FTP connection per call
#[async_trait]
pub trait FileAccess: Send + Sync {
    /// Human-readable location of the root, for logs.
    fn describe(&self) -> String;

    /// Reads the whole file.
    async fn read_file(&self, name: &str) -> TransportResult<Vec<u8>>;

    /// Replaces the whole file with `data`.
    async fn write_file(&self, name: &str, data: &[u8]) -> TransportResult<()>;
}
