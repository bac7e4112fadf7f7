//! Local directory backend.

use super::FileAccess;
use crate::error::TransportResult;
use crate::path::local_path;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;

/// Parameters of the local backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LocalParams {
    /// Server root directory.
    pub path: PathBuf,
}

impl LocalParams {
    /// Creates parameters rooted at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Files in a directory on this machine.
#[derive(Debug, Clone)]
pub struct LocalFiles {
    root: PathBuf,
}

impl LocalFiles {
    /// Creates a backend rooted at `params.path`.
    pub fn new(params: &LocalParams) -> Self {
        Self {
            root: params.path.clone(),
        }
    }
}

#[async_trait]
impl FileAccess for LocalFiles {
    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }

    async fn read_file(&self, name: &str) -> TransportResult<Vec<u8>> {
        Ok(tokio::fs::read(local_path(&self.root, name)).await?)
    }

    async fn write_file(&self, name: &str, data: &[u8]) -> TransportResult<()> {
        Ok(tokio::fs::write(local_path(&self.root, name), data).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use tempfile::tempdir;

    #[tokio::test]
    async fn read_write_roundtrip() {
        let dir = tempdir().unwrap();
        let files = LocalFiles::new(&LocalParams {
            path: dir.path().to_path_buf(),
        });

        files.write_file("whitelist.json", b"[]").await.unwrap();
        assert_eq!(files.read_file("whitelist.json").await.unwrap(), b"[]");
        assert!(dir.path().join("whitelist.json").exists());
    }

    #[tokio::test]
    async fn escape_attempt_stays_inside_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("server");
        std::fs::create_dir(&root).unwrap();
        let files = LocalFiles::new(&LocalParams { path: root.clone() });

        files.write_file("../outside.json", b"x").await.unwrap();
        assert!(root.join("outside.json").exists());
        assert!(!dir.path().join("outside.json").exists());
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let files = LocalFiles::new(&LocalParams {
            path: dir.path().to_path_buf(),
        });
        assert!(matches!(
            files.read_file("nope.json").await,
            Err(TransportError::Io(_))
        ));
    }

    #[test]
    fn params_from_json() {
        let params: LocalParams = serde_json::from_str(r#"{"path": "/srv/mc"}"#).unwrap();
        assert_eq!(params.path, PathBuf::from("/srv/mc"));
    }
}
