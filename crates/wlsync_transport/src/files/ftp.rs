//! FTP backend.

use super::FileAccess;
use crate::error::{TransportError, TransportResult};
use crate::path::remote_path;
use async_trait::async_trait;
use serde::Deserialize;
use suppaftp::types::FileType;
use suppaftp::FtpStream;
use tracing::debug;

fn default_port() -> u16 {
    21
}

fn default_username() -> String {
    "anonymous".to_string()
}

/// Parameters of the FTP backend.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpParams {
    /// Host name.
    pub host: String,
    /// Control port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Login name.
    #[serde(default = "default_username")]
    pub username: String,
    /// Login password.
    #[serde(default)]
    pub password: String,
    /// Server root, resolved from `/`.
    #[serde(default)]
    pub path: String,
}

impl std::fmt::Debug for FtpParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl FtpParams {
    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// FTP roots are always absolute.
    fn resolve(&self, name: &str) -> String {
        remote_path(&format!("/{}", self.path), name)
    }
}

/// Files on a server reached over FTP.
#[derive(Debug, Clone)]
pub struct FtpFiles {
    params: FtpParams,
}

impl FtpFiles {
    /// Creates a backend from `params`.
    pub fn new(params: FtpParams) -> Self {
        Self { params }
    }

    async fn with_stream<T, F>(&self, f: F) -> TransportResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut FtpStream) -> TransportResult<T> + Send + 'static,
    {
        let params = self.params.clone();
        tokio::task::spawn_blocking(move || {
            let endpoint = params.endpoint();
            debug!(%endpoint, "opening ftp connection");

            let mut stream =
                FtpStream::connect(&endpoint).map_err(|e| TransportError::connect(&endpoint, e))?;
            stream
                .login(params.username.as_str(), params.password.as_str())
                .map_err(|e| TransportError::Authentication(format!("{endpoint}: {e}")))?;
            stream
                .transfer_type(FileType::Binary)
                .map_err(|e| TransportError::Remote(e.to_string()))?;

            let result = f(&mut stream);
            let _ = stream.quit();
            result
        })
        .await?
    }
}

#[async_trait]
impl FileAccess for FtpFiles {
    fn describe(&self) -> String {
        format!("ftp://{}{}", self.params.endpoint(), self.params.resolve(""))
    }

    async fn read_file(&self, name: &str) -> TransportResult<Vec<u8>> {
        let path = self.params.resolve(name);
        self.with_stream(move |stream| {
            let buffer = stream
                .retr_as_buffer(&path)
                .map_err(|e| TransportError::Remote(format!("{path}: {e}")))?;
            Ok(buffer.into_inner())
        })
        .await
    }

    async fn write_file(&self, name: &str, data: &[u8]) -> TransportResult<()> {
        let path = self.params.resolve(name);
        let data = data.to_vec();
        self.with_stream(move |stream| {
            let mut reader = std::io::Cursor::new(data);
            stream
                .put_file(&path, &mut reader)
                .map_err(|e| TransportError::Remote(format!("{path}: {e}")))?;
            Ok(())
        })
        .await
    }
}
