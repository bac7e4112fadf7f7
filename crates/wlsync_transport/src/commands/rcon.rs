//! Minecraft remote console (RCON) backend.
//!
//! Wire format of one packet, all integers little-endian:
//!
//! ```text
//! i32 length     # bytes after this field
//! i32 request id
//! i32 type       # 3 = login, 2 = command, 0 = response
//! [u8] body      # ASCII
//! u8 0, u8 0
//! ```

use super::pool::RconPool;
use super::CommandChannel;
use crate::error::{TransportError, TransportResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Bound on connecting and on waiting for any single response.
const IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest packet we accept.
const MAX_PACKET_LEN: i32 = 1 << 20;

fn default_port() -> u16 {
    25575
}

/// Parameters of the RCON backend.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct RconParams {
    /// Host name.
    pub host: String,
    /// RCON port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// RCON password.
    pub password: String,
}

impl std::fmt::Debug for RconParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RconParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

impl RconParams {
    /// Creates parameters for `host:port`.
    pub fn new(host: impl Into<String>, port: u16, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            password: password.into(),
        }
    }

    /// The pool key, `host:port`.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// One RCON packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconPacket {
    /// Request id, echoed by the server. `-1` in a login reply means failure.
    pub id: i32,
    /// Packet type.
    pub kind: i32,
    /// Payload.
    pub body: String,
}

impl RconPacket {
    /// Login request.
    pub const LOGIN: i32 = 3;
    /// Command request, also the type of a login reply.
    pub const COMMAND: i32 = 2;
    /// Command response.
    pub const RESPONSE: i32 = 0;

    /// Creates a packet.
    pub fn new(id: i32, kind: i32, body: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            body: body.into(),
        }
    }

    /// Encodes the packet including its length prefix.
    pub fn encode(&self) -> Vec<u8> {
        let body = self.body.as_bytes();
        let length = (4 + 4 + body.len() + 2) as i32;

        let mut out = Vec::with_capacity(4 + length as usize);
        out.extend_from_slice(&length.to_le_bytes());
        out.extend_from_slice(&self.id.to_le_bytes());
        out.extend_from_slice(&self.kind.to_le_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(&[0, 0]);
        out
    }

    /// Reads one packet.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> TransportResult<Self> {
        let length = reader.read_i32_le().await?;
        if !(10..=MAX_PACKET_LEN).contains(&length) {
            return Err(TransportError::Protocol(format!(
                "invalid packet length {length}"
            )));
        }

        let mut rest = vec![0u8; length as usize];
        reader.read_exact(&mut rest).await?;

        let id = i32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
        let kind = i32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]);
        let body = &rest[8..rest.len() - 2];

        Ok(Self {
            id,
            kind,
            body: String::from_utf8_lossy(body).into_owned(),
        })
    }

    /// Writes the packet.
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> TransportResult<()> {
        writer.write_all(&self.encode()).await?;
        writer.flush().await?;
        Ok(())
    }
}

async fn bounded<T>(
    future: impl std::future::Future<Output = TransportResult<T>>,
) -> TransportResult<T> {
    tokio::time::timeout(IO_TIMEOUT, future)
        .await
        .map_err(|_| TransportError::Timeout(IO_TIMEOUT))?
}

/// An authenticated RCON connection.
#[derive(Debug)]
pub struct RconConnection {
    stream: TcpStream,
    next_id: i32,
}

impl RconConnection {
    /// Connects and logs in.
    ///
    /// # Errors
    ///
    /// Returns `Authentication` if the server rejects the password.
    pub async fn connect(params: &RconParams) -> TransportResult<Self> {
        let endpoint = params.endpoint();
        debug!(%endpoint, "opening rcon connection");

        let stream = tokio::time::timeout(IO_TIMEOUT, TcpStream::connect(&endpoint))
            .await
            .map_err(|_| TransportError::Timeout(IO_TIMEOUT))?
            .map_err(|e| TransportError::connect(&endpoint, e))?;

        let mut connection = Self { stream, next_id: 1 };
        connection.login(&params.password, &endpoint).await?;
        Ok(connection)
    }

    async fn login(&mut self, password: &str, endpoint: &str) -> TransportResult<()> {
        let id = self.take_id();
        RconPacket::new(id, RconPacket::LOGIN, password)
            .write_to(&mut self.stream)
            .await?;

        loop {
            let reply = bounded(RconPacket::read_from(&mut self.stream)).await?;
            if reply.kind != RconPacket::COMMAND {
                // Some servers send an empty response before the login reply
                continue;
            }
            if reply.id == -1 {
                return Err(TransportError::Authentication(format!(
                    "rcon {endpoint} rejected the password"
                )));
            }
            if reply.id != id {
                return Err(TransportError::Protocol(format!(
                    "login reply for request {} while waiting for {id}",
                    reply.id
                )));
            }
            return Ok(());
        }
    }

    fn take_id(&mut self) -> i32 {
        let id = self.next_id;
        self.next_id = self.next_id.checked_add(1).unwrap_or(1);
        id
    }

    /// Runs one command and returns its response.
    pub async fn execute(&mut self, command: &str) -> TransportResult<String> {
        let id = self.take_id();
        RconPacket::new(id, RconPacket::COMMAND, command)
            .write_to(&mut self.stream)
            .await?;

        loop {
            let reply = bounded(RconPacket::read_from(&mut self.stream)).await?;
            if reply.kind == RconPacket::RESPONSE && reply.id == id {
                return Ok(reply.body);
            }
            debug!(id = reply.id, kind = reply.kind, "skipping stray rcon packet");
        }
    }

    /// Shuts the connection down.
    pub async fn close(mut self) {
        let _ = self.stream.shutdown().await;
    }
}

/// Runs commands over a pooled RCON connection.
#[derive(Debug, Clone)]
pub struct RconChannel {
    params: RconParams,
    pool: Arc<RconPool>,
}

impl RconChannel {
    /// Creates a channel that shares connections through `pool`.
    pub fn new(params: RconParams, pool: Arc<RconPool>) -> Self {
        Self { params, pool }
    }
}

#[async_trait]
impl CommandChannel for RconChannel {
    fn describe(&self) -> String {
        format!("rcon://{}", self.params.endpoint())
    }

    async fn run_commands(&self, commands: &[String]) -> TransportResult<Vec<String>> {
        self.pool.run(&self.params, commands).await
    }
}
