//! Collaborators the engine queries but does not own.
//!
//! The guild directory answers role membership for identities; the name
//! resolver maps Minecraft names to UUIDs and back. Both are supplied by
//! the front end (a chat bot, the CLI's snapshot files, or test doubles).

use crate::error::EngineResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// Largest number of ids passed to one [`GuildDirectory::fetch_members`] call.
pub const MEMBER_BATCH_SIZE: usize = 100;

/// A Minecraft account with its current display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Profile {
    /// Account UUID.
    pub uuid: Uuid,
    /// Display name.
    pub name: String,
}

impl Profile {
    /// Creates a profile.
    pub fn new(uuid: Uuid, name: impl Into<String>) -> Self {
        Self {
            uuid,
            name: name.into(),
        }
    }
}

/// Role membership of one guild member.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildMember {
    /// Role ids held by the member.
    #[serde(default)]
    pub roles: BTreeSet<String>,
}

impl GuildMember {
    /// Creates a member holding `roles`.
    pub fn with_roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }
}

/// Looks up guild members by identity id.
#[async_trait]
pub trait GuildDirectory: Send + Sync {
    /// Fetches the members among `ids`.
    ///
    /// Ids that are not (or no longer) guild members are absent from the
    /// result. Callers pass at most [`MEMBER_BATCH_SIZE`] ids.
    async fn fetch_members(&self, ids: &[String]) -> EngineResult<HashMap<String, GuildMember>>;
}

/// Maps Minecraft names to UUIDs and back.
#[async_trait]
pub trait NameResolver: Send + Sync {
    /// Resolves many names at once, keyed by lowercased name.
    ///
    /// Unknown names are absent from the result.
    async fn resolve_uuids(&self, names: &[String]) -> EngineResult<HashMap<String, Uuid>>;

    /// Returns the current profile of every known UUID among `uuids`.
    async fn resolve_names(&self, uuids: &[Uuid]) -> EngineResult<Vec<Profile>>;

    /// Resolves one name.
    async fn resolve_uuid(&self, name: &str) -> EngineResult<Option<Uuid>> {
        let mut resolved = self.resolve_uuids(&[name.to_string()]).await?;
        Ok(resolved.remove(&name.to_lowercase()))
    }
}

/// Resolves display names for `uuids` into a lookup table.
pub(crate) async fn name_table(
    names: &dyn NameResolver,
    uuids: &[Uuid],
) -> EngineResult<HashMap<Uuid, String>> {
    if uuids.is_empty() {
        return Ok(HashMap::new());
    }
    Ok(names
        .resolve_names(uuids)
        .await?
        .into_iter()
        .map(|profile| (profile.uuid, profile.name))
        .collect())
}
