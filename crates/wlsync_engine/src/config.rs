//! Configuration for the whitelist engine.
//!
//! Loaded from one JSON document:
//!
//! ```json
//! {
//!   "database": "./whitelist.json",
//!   "debounceMs": 5000,
//!   "servers": {
//!     "survival.smp": {
//!       "local": { "path": "/srv/survival" },
//!       "rcon": { "host": "127.0.0.1", "password": "..." },
//!       "opEveryone": false
//!     }
//!   },
//!   "roles": {
//!     "123": { "servers": ["*.smp", "creative"], "allowedLinks": 2 }
//!   }
//! }
//! ```
//!
//! A broken server block only excludes that server; it is logged and the
//! rest of the document still loads.

use crate::error::{ConfigError, ConfigResult};
use crate::reconcile::ManagedServer;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::error;
use wlsync_transport::{
    CommandChannel, FileAccess, FtpFiles, FtpParams, LocalFiles, LocalParams, PipeChannel,
    PipeParams, RconChannel, RconParams, RconPool, SftpFiles, SftpParams,
};

/// Default delay between a trigger and the reconciliation pass.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(5000);

fn default_database() -> PathBuf {
    PathBuf::from("./whitelist.json")
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE.as_millis() as u64
}

/// Where a server's whitelist file lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileBackend {
    /// A directory on this machine.
    Local(LocalParams),
    /// A directory over SFTP.
    Sftp(SftpParams),
    /// A directory over FTP.
    Ftp(FtpParams),
}

impl FileBackend {
    fn open(&self, id: &str) -> ConfigResult<Arc<dyn FileAccess>> {
        Ok(match self {
            FileBackend::Local(params) => Arc::new(LocalFiles::new(params)),
            FileBackend::Sftp(params) => Arc::new(SftpFiles::new(params.clone()).map_err(
                |e| ConfigError::InvalidServer {
                    server: id.to_string(),
                    message: e.to_string(),
                },
            )?),
            FileBackend::Ftp(params) => Arc::new(FtpFiles::new(params.clone())),
        })
    }
}

/// How commands reach a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandBackend {
    /// Lines appended to a console pipe.
    Pipe(PipeParams),
    /// A pooled remote console connection.
    Rcon(RconParams),
}

impl CommandBackend {
    fn open(&self, pool: &Arc<RconPool>) -> Arc<dyn CommandChannel> {
        match self {
            CommandBackend::Pipe(params) => Arc::new(PipeChannel::new(params)),
            CommandBackend::Rcon(params) => {
                Arc::new(RconChannel::new(params.clone(), Arc::clone(pool)))
            }
        }
    }
}

/// A server block as written in the document.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServer {
    local: Option<LocalParams>,
    sftp: Option<SftpParams>,
    ftp: Option<FtpParams>,
    pipe: Option<PipeParams>,
    rcon: Option<RconParams>,
    #[serde(default)]
    op_everyone: bool,
}

/// Configuration of one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSpec {
    /// File backend.
    pub files: FileBackend,
    /// Command backend.
    pub commands: CommandBackend,
    /// Whether every added account is also made operator.
    pub op_everyone: bool,
}

impl ServerSpec {
    /// Creates a server spec.
    pub fn new(files: FileBackend, commands: CommandBackend) -> Self {
        Self {
            files,
            commands,
            op_everyone: false,
        }
    }

    /// Sets the `opEveryone` flag.
    pub fn with_op_everyone(mut self, op_everyone: bool) -> Self {
        self.op_everyone = op_everyone;
        self
    }

    /// Parses one server block.
    ///
    /// File backends are picked in the order local, sftp, ftp and command
    /// backends in the order pipe, rcon.
    pub fn from_value(id: &str, value: serde_json::Value) -> ConfigResult<Self> {
        let raw: RawServer =
            serde_json::from_value(value).map_err(|e| ConfigError::InvalidServer {
                server: id.to_string(),
                message: e.to_string(),
            })?;

        let files = if let Some(local) = raw.local {
            FileBackend::Local(local)
        } else if let Some(sftp) = raw.sftp {
            FileBackend::Sftp(sftp)
        } else if let Some(ftp) = raw.ftp {
            FileBackend::Ftp(ftp)
        } else {
            return Err(ConfigError::MissingFileBackend(id.to_string()));
        };

        let commands = if let Some(pipe) = raw.pipe {
            CommandBackend::Pipe(pipe)
        } else if let Some(rcon) = raw.rcon {
            CommandBackend::Rcon(rcon)
        } else {
            return Err(ConfigError::MissingCommandBackend(id.to_string()));
        };

        Ok(Self::new(files, commands).with_op_everyone(raw.op_everyone))
    }

    /// Opens the transports of this server.
    pub fn build(&self, id: &str, pool: &Arc<RconPool>) -> ConfigResult<ManagedServer> {
        let files = self.files.open(id)?;
        let commands = self.commands.open(pool);
        Ok(ManagedServer::new(id, files, commands).with_op_everyone(self.op_everyone))
    }
}

/// What holding a role grants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleGrant {
    /// Server ids or `*.suffix` groups.
    #[serde(default)]
    pub servers: Vec<String>,
    /// Cap on linked accounts; absent means unlimited.
    #[serde(default)]
    pub allowed_links: Option<u32>,
}

impl RoleGrant {
    /// Creates a grant for `servers` with no link cap.
    pub fn new<I, S>(servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            servers: servers.into_iter().map(Into::into).collect(),
            allowed_links: None,
        }
    }

    /// Sets the link cap.
    pub fn with_allowed_links(mut self, allowed: u32) -> Self {
        self.allowed_links = Some(allowed);
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    #[serde(default = "default_database")]
    database: PathBuf,
    #[serde(default = "default_debounce_ms")]
    debounce_ms: u64,
    #[serde(default)]
    servers: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    roles: BTreeMap<String, RoleGrant>,
}

/// Configuration of the whitelist engine.
#[derive(Debug, Clone)]
pub struct WhitelistConfig {
    /// Path of the identity store document.
    pub database: PathBuf,
    /// Delay between a trigger and the pass it causes.
    pub debounce: Duration,
    /// Servers by id.
    pub servers: BTreeMap<String, ServerSpec>,
    /// Role grants by role id.
    pub roles: BTreeMap<String, RoleGrant>,
}

impl WhitelistConfig {
    /// Creates an empty configuration backed by `database`.
    pub fn new(database: impl Into<PathBuf>) -> Self {
        Self {
            database: database.into(),
            debounce: DEFAULT_DEBOUNCE,
            servers: BTreeMap::new(),
            roles: BTreeMap::new(),
        }
    }

    /// Sets the debounce delay.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Adds a server.
    pub fn with_server(mut self, id: impl Into<String>, spec: ServerSpec) -> Self {
        self.servers.insert(id.into(), spec);
        self
    }

    /// Adds a role grant.
    pub fn with_role(mut self, role: impl Into<String>, grant: RoleGrant) -> Self {
        self.roles.insert(role.into(), grant);
        self
    }

    /// Reads and parses the configuration file at `path`.
    ///
    /// A relative `database` path is resolved against the file's directory.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_json(&text)?;
        if config.database.is_relative() {
            if let Some(dir) = path.parent() {
                config.database = dir.join(&config.database);
            }
        }
        Ok(config)
    }

    /// Parses a configuration document.
    ///
    /// Broken server blocks are logged and left out.
    pub fn from_json(text: &str) -> ConfigResult<Self> {
        let raw: RawConfig = serde_json::from_str(text)?;

        let mut servers = BTreeMap::new();
        for (id, value) in raw.servers {
            match ServerSpec::from_value(&id, value) {
                Ok(spec) => {
                    servers.insert(id, spec);
                }
                Err(e) => error!(server = %id, error = %e, "ignoring server"),
            }
        }

        Ok(Self {
            database: raw.database,
            debounce: Duration::from_millis(raw.debounce_ms),
            servers,
            roles: raw.roles,
        })
    }

    /// Opens the transports of every server.
    ///
    /// Servers whose transports cannot be created are logged and left out.
    pub fn build_servers(&self, pool: &Arc<RconPool>) -> Vec<ManagedServer> {
        self.servers
            .iter()
            .filter_map(|(id, spec)| match spec.build(id, pool) {
                Ok(server) => Some(server),
                Err(e) => {
                    error!(server = %id, error = %e, "ignoring server");
                    None
                }
            })
            .collect()
    }

    /// Ids of all configured servers.
    pub fn server_ids(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"{
        "database": "links.json",
        "debounceMs": 250,
        "servers": {
            "survival.smp": {
                "local": { "path": "/srv/survival" },
                "sftp": { "host": "h", "username": "u", "password": "p", "path": "/x" },
                "pipe": { "path": "/srv/survival/console" },
                "rcon": { "host": "127.0.0.1", "password": "pw" },
                "opEveryone": true
            },
            "creative": {
                "ftp": { "host": "ftp.example.com", "path": "mc" },
                "rcon": { "host": "10.0.0.2", "port": 25576, "password": "pw" }
            },
            "broken": {
                "local": { "path": "/srv/broken" }
            },
            "mistyped": {
                "local": { "path": 7 },
                "pipe": { "path": "/p" }
            }
        },
        "roles": {
            "100": { "servers": ["*.smp"], "allowedLinks": 2 },
            "200": { "servers": ["creative"] }
        }
    }"#;

    #[test]
    fn parses_document() {
        let config = WhitelistConfig::from_json(DOCUMENT).unwrap();
        assert_eq!(config.database, PathBuf::from("links.json"));
        assert_eq!(config.debounce, Duration::from_millis(250));
        assert_eq!(config.server_ids(), vec!["creative", "survival.smp"]);

        let survival = &config.servers["survival.smp"];
        assert!(matches!(survival.files, FileBackend::Local(_)));
        assert!(matches!(survival.commands, CommandBackend::Pipe(_)));
        assert!(survival.op_everyone);

        let creative = &config.servers["creative"];
        assert!(matches!(creative.files, FileBackend::Ftp(_)));
        assert!(matches!(
            &creative.commands,
            CommandBackend::Rcon(params) if params.endpoint() == "10.0.0.2:25576"
        ));
        assert!(!creative.op_everyone);

        assert_eq!(config.roles["100"].allowed_links, Some(2));
        assert_eq!(config.roles["200"].allowed_links, None);
    }

    #[test]
    fn defaults() {
        let config = WhitelistConfig::from_json("{}").unwrap();
        assert_eq!(config.database, PathBuf::from("./whitelist.json"));
        assert_eq!(config.debounce, DEFAULT_DEBOUNCE);
        assert!(config.servers.is_empty());
    }

    #[test]
    fn missing_backends_are_errors() {
        let err = ServerSpec::from_value("s", serde_json::json!({ "pipe": { "path": "/p" } }))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingFileBackend(id) if id == "s"));

        let err = ServerSpec::from_value("s", serde_json::json!({ "local": { "path": "/p" } }))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingCommandBackend(id) if id == "s"));
    }

    #[test]
    fn sftp_without_credentials_is_left_out() {
        let spec = ServerSpec::from_value(
            "remote",
            serde_json::json!({
                "sftp": { "host": "h", "username": "u", "path": "/x" },
                "pipe": { "path": "/p" }
            }),
        )
        .unwrap();
        let config = WhitelistConfig::new("db.json").with_server("remote", spec);

        let servers = config.build_servers(&RconPool::new());
        assert!(servers.is_empty());
    }

    #[test]
    fn builder() {
        let spec = ServerSpec::new(
            FileBackend::Local(LocalParams::new("/srv/a")),
            CommandBackend::Pipe(PipeParams::new("/srv/a/console")),
        )
        .with_op_everyone(true);
        let config = WhitelistConfig::new("db.json")
            .with_debounce(Duration::from_millis(10))
            .with_server("a", spec)
            .with_role("1", RoleGrant::new(["a"]).with_allowed_links(3));

        let servers = config.build_servers(&RconPool::new());
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].id(), "a");
        assert!(servers[0].op_everyone());
        assert_eq!(config.roles["1"].allowed_links, Some(3));
    }
}
