//! SFTP backend.
//!
//! libssh2 is blocking, so every call runs on the blocking pool with its
//! own session that is disconnected before returning.

use super::FileAccess;
use crate::error::{TransportError, TransportResult};
use crate::path::remote_path;
use async_trait::async_trait;
use serde::Deserialize;
use ssh2::Session;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use tracing::debug;

const SESSION_TIMEOUT_MS: u32 = 30_000;

fn default_port() -> u16 {
    22
}

/// Parameters of the SFTP backend.
///
/// Either `private_key` or `password` must be set; the key wins if both are.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SftpParams {
    /// Host name.
    pub host: String,
    /// SSH port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Login name.
    pub username: String,
    /// Password authentication.
    #[serde(default)]
    pub password: Option<String>,
    /// Path to a private key file.
    #[serde(default)]
    pub private_key: Option<PathBuf>,
    /// Passphrase of the private key.
    #[serde(default)]
    pub passphrase: Option<String>,
    /// Server root on the remote side.
    pub path: String,
}

impl std::fmt::Debug for SftpParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("private_key", &self.private_key)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SftpParams {
    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Files on a server reached over SFTP.
#[derive(Debug, Clone)]
pub struct SftpFiles {
    params: SftpParams,
}

impl SftpFiles {
    /// Creates a backend from `params`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if no authentication method is configured.
    pub fn new(params: SftpParams) -> TransportResult<Self> {
        if params.password.is_none() && params.private_key.is_none() {
            return Err(TransportError::InvalidConfig(format!(
                "sftp {} needs a password or a private key",
                params.endpoint()
            )));
        }
        Ok(Self { params })
    }

    async fn with_session<T, F>(&self, f: F) -> TransportResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Session) -> TransportResult<T> + Send + 'static,
    {
        let params = self.params.clone();
        tokio::task::spawn_blocking(move || {
            let session = open_session(&params)?;
            let result = f(&session);
            let _ = session.disconnect(None, "done", None);
            result
        })
        .await?
    }
}

fn open_session(params: &SftpParams) -> TransportResult<Session> {
    let endpoint = params.endpoint();
    debug!(%endpoint, "opening sftp session");

    let tcp = TcpStream::connect(&endpoint).map_err(|e| TransportError::connect(&endpoint, e))?;
    let mut session = Session::new().map_err(|e| TransportError::connect(&endpoint, e))?;
    session.set_timeout(SESSION_TIMEOUT_MS);
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| TransportError::connect(&endpoint, e))?;

    let auth = match (&params.private_key, &params.password) {
        (Some(key), _) => session.userauth_pubkey_file(
            &params.username,
            None,
            key,
            params.passphrase.as_deref(),
        ),
        (None, Some(password)) => session.userauth_password(&params.username, password),
        (None, None) => {
            return Err(TransportError::InvalidConfig(format!(
                "sftp {endpoint} needs a password or a private key"
            )))
        }
    };
    auth.map_err(|e| TransportError::Authentication(format!("{endpoint}: {e}")))?;
    if !session.authenticated() {
        return Err(TransportError::Authentication(endpoint));
    }

    Ok(session)
}

fn remote_error(path: &str, err: impl std::fmt::Display) -> TransportError {
    TransportError::Remote(format!("{path}: {err}"))
}

#[async_trait]
impl FileAccess for SftpFiles {
    fn describe(&self) -> String {
        format!("sftp://{}{}", self.params.endpoint(), self.params.path)
    }

    async fn read_file(&self, name: &str) -> TransportResult<Vec<u8>> {
        let path = remote_path(&self.params.path, name);
        self.with_session(move |session| {
            let sftp = session.sftp().map_err(|e| remote_error(&path, e))?;
            let mut file = sftp
                .open(Path::new(&path))
                .map_err(|e| remote_error(&path, e))?;
            let mut data = Vec::new();
            file.read_to_end(&mut data)?;
            Ok(data)
        })
        .await
    }

    async fn write_file(&self, name: &str, data: &[u8]) -> TransportResult<()> {
        let path = remote_path(&self.params.path, name);
        let data = data.to_vec();
        self.with_session(move |session| {
            let sftp = session.sftp().map_err(|e| remote_error(&path, e))?;
            let mut file = sftp
                .create(Path::new(&path))
                .map_err(|e| remote_error(&path, e))?;
            file.write_all(&data)?;
            file.flush()?;
            Ok(())
        })
        .await
    }
}
