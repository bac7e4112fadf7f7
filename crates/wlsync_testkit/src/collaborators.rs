//! Fixed guild and name collaborators.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use uuid::Uuid;
use wlsync_engine::{
    EngineError, EngineResult, GuildDirectory, GuildMember, NameResolver, Profile,
};

/// A guild whose members are set by the test.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    members: Mutex<HashMap<String, GuildMember>>,
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl StaticDirectory {
    /// Creates an empty guild.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a member.
    pub fn set_member(&self, id: &str, roles: &[&str]) {
        self.members
            .lock()
            .insert(id.to_string(), GuildMember::with_roles(roles.iter().copied()));
    }

    /// Removes a member from the guild.
    pub fn remove_member(&self, id: &str) {
        self.members.lock().remove(id);
    }

    /// Makes every lookup fail.
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of `fetch_members` calls.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GuildDirectory for StaticDirectory {
    async fn fetch_members(&self, ids: &[String]) -> EngineResult<HashMap<String, GuildMember>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::Resolution("guild unavailable".into()));
        }
        let members = self.members.lock();
        Ok(ids
            .iter()
            .filter_map(|id| members.get(id).map(|m| (id.clone(), m.clone())))
            .collect())
    }
}

/// A fixed set of Minecraft profiles.
#[derive(Debug, Default)]
pub struct StaticNames {
    profiles: Mutex<HashMap<Uuid, String>>,
}

impl StaticNames {
    /// Creates an empty profile set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or renames a profile.
    pub fn add(&self, uuid: Uuid, name: &str) {
        self.profiles.lock().insert(uuid, name.to_string());
    }
}

#[async_trait]
impl NameResolver for StaticNames {
    async fn resolve_uuids(&self, names: &[String]) -> EngineResult<HashMap<String, Uuid>> {
        let profiles = self.profiles.lock();
        let mut resolved = HashMap::new();
        for name in names {
            let wanted = name.to_lowercase();
            if let Some((uuid, _)) = profiles
                .iter()
                .find(|(_, known)| known.to_lowercase() == wanted)
            {
                resolved.insert(wanted, *uuid);
            }
        }
        Ok(resolved)
    }

    async fn resolve_names(&self, uuids: &[Uuid]) -> EngineResult<Vec<Profile>> {
        let profiles = self.profiles.lock();
        Ok(uuids
            .iter()
            .filter_map(|uuid| profiles.get(uuid).map(|name| Profile::new(*uuid, name)))
            .collect())
    }
}
