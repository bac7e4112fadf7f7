//! File-backed collaborators.
//!
//! The members file is a guild snapshot exported by the bot:
//!
//! ```json
//! { "<identity id>": { "roles": ["<role id>", ...] } }
//! ```
//!
//! The profiles file uses the bot's name cache layout, keyed by lowercased
//! name:
//!
//! ```json
//! { "steve": { "name": "Steve", "uuid": "...", "expires": "2024-01-01T00:00:00.000Z" } }
//! ```
//!
//! Both are re-read on every lookup, so a running daemon sees updates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;
use wlsync_engine::{EngineError, EngineResult, GuildDirectory, GuildMember, NameResolver, Profile};

async fn read_json<T: serde::de::DeserializeOwned + Default>(path: &Path) -> EngineResult<T> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "snapshot file missing, treating as empty");
            return Ok(T::default());
        }
        Err(e) => {
            return Err(EngineError::Resolution(format!(
                "cannot read {}: {e}",
                path.display()
            )))
        }
    };
    serde_json::from_slice(&data)
        .map_err(|e| EngineError::Resolution(format!("invalid {}: {e}", path.display())))
}

/// Guild membership read from a snapshot file.
#[derive(Debug, Clone)]
pub struct MembersFile {
    path: PathBuf,
}

impl MembersFile {
    /// Creates a directory backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl GuildDirectory for MembersFile {
    async fn fetch_members(&self, ids: &[String]) -> EngineResult<HashMap<String, GuildMember>> {
        let mut all: HashMap<String, GuildMember> = read_json(&self.path).await?;
        Ok(ids
            .iter()
            .filter_map(|id| all.remove(id).map(|member| (id.clone(), member)))
            .collect())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct CachedProfile {
    name: String,
    uuid: Uuid,
    expires: DateTime<Utc>,
}

/// Minecraft profiles read from a name cache file.
///
/// Expired entries are ignored.
#[derive(Debug, Clone)]
pub struct ProfilesFile {
    path: PathBuf,
}

impl ProfilesFile {
    /// Creates a resolver backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn live(&self) -> EngineResult<Vec<CachedProfile>> {
        let cache: HashMap<String, CachedProfile> = read_json(&self.path).await?;
        let now = Utc::now();
        Ok(cache
            .into_values()
            .filter(|profile| profile.expires > now)
            .collect())
    }
}

#[async_trait]
impl NameResolver for ProfilesFile {
    async fn resolve_uuids(&self, names: &[String]) -> EngineResult<HashMap<String, Uuid>> {
        let by_name: HashMap<String, Uuid> = self
            .live()
            .await?
            .into_iter()
            .map(|profile| (profile.name.to_lowercase(), profile.uuid))
            .collect();
        Ok(names
            .iter()
            .map(|name| name.to_lowercase())
            .filter_map(|name| by_name.get(&name).map(|uuid| (name, *uuid)))
            .collect())
    }

    async fn resolve_names(&self, uuids: &[Uuid]) -> EngineResult<Vec<Profile>> {
        Ok(self
            .live()
            .await?
            .into_iter()
            .filter(|profile| uuids.contains(&profile.uuid))
            .map(|profile| Profile::new(profile.uuid, profile.name))
            .collect())
    }
}
