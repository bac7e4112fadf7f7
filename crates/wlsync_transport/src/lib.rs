//! # wlsync Transport
//!
//! Pluggable access to Minecraft servers.
//!
//! This crate provides two independent capabilities:
//! - [`FileAccess`] - read and write a named file beneath a server root
//!   (local directory, SFTP, FTP)
//! - [`CommandChannel`] - run administrative commands on a server
//!   (append-only command pipe, pooled RCON connection)
//!
//! Backends are chosen per server from configuration; callers only ever
//! see the two traits.
//!
//! ## Connection lifetime
//!
//! - SFTP and FTP open one connection per call and close it afterwards
//! - RCON connections are pooled by `host:port` and closed after an idle
//!   window (see [`RconPool`])
//! - Pipe writes are serialized and bounded by a timeout

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod commands;
mod error;
mod files;
mod path;

pub use commands::pipe::{PipeChannel, PipeParams, DEFAULT_PIPE_TIMEOUT};
pub use commands::pool::{RconPool, DEFAULT_IDLE_WINDOW};
pub use commands::rcon::{RconChannel, RconConnection, RconPacket, RconParams};
pub use commands::CommandChannel;
pub use error::{TransportError, TransportResult};
pub use files::ftp::{FtpFiles, FtpParams};
pub use files::local::{LocalFiles, LocalParams};
pub use files::sftp::{SftpFiles, SftpParams};
pub use files::FileAccess;
pub use path::{local_path, remote_path};
