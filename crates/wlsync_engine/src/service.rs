//! Admin operations on linked accounts.
//!
//! Every successful mutation triggers the update scheduler, so servers
//! follow the store after the debounce window.

use crate::directory::{name_table, NameResolver, Profile};
use crate::error::{AdminError, AdminResult, EngineResult};
use crate::reconcile::ReconcileReport;
use crate::resolver::{LinkCap, MembershipResolver};
use crate::scheduler::UpdateScheduler;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use wlsync_store::{parse_uuid, IdentityRecord, IdentityStore, StoreError};

/// Everything known about one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    /// Identity id.
    pub id: String,
    /// Linked accounts with their display names.
    pub profiles: Vec<Profile>,
    /// Whether the identity is banned.
    pub banned: bool,
    /// Servers the identity's roles grant.
    pub servers: BTreeSet<String>,
    /// Link cap, `None` for unlimited.
    pub allowed_links: LinkCap,
    /// Whether the identity is currently a guild member.
    pub member: bool,
}

/// One identity in a [`Dump`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DumpUser {
    /// Present and true for banned identities.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub banned: bool,
    /// Linked accounts and their display names.
    pub uuids: BTreeMap<Uuid, Option<String>>,
    /// Granted servers, absent for identities outside the guild.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub servers: Option<BTreeSet<String>>,
}

/// Human-readable snapshot of the whole state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Dump {
    /// Identities with linked accounts.
    pub users: BTreeMap<String, DumpUser>,
    /// Removed accounts and their display names.
    pub removed: BTreeMap<Uuid, Option<String>>,
}

/// Replaces legacy display names in the store by UUIDs.
///
/// Returns false if no record held legacy names. Unresolvable names are
/// dropped with a warning.
pub async fn migrate_legacy_names(
    store: &IdentityStore,
    names: &dyn NameResolver,
) -> EngineResult<bool> {
    let legacy: Vec<String> = store.legacy_names().into_iter().collect();
    if legacy.is_empty() {
        return Ok(false);
    }
    info!(count = legacy.len(), "migrating legacy names to uuids");
    let resolved = names.resolve_uuids(&legacy).await?;
    Ok(store.complete_name_migration(&resolved)?)
}

/// The operations a front end invokes on behalf of users and admins.
pub struct WhitelistService {
    store: Arc<IdentityStore>,
    resolver: Arc<MembershipResolver>,
    names: Arc<dyn NameResolver>,
    scheduler: UpdateScheduler,
}

impl WhitelistService {
    /// Creates a service.
    pub fn new(
        store: Arc<IdentityStore>,
        resolver: Arc<MembershipResolver>,
        names: Arc<dyn NameResolver>,
        scheduler: UpdateScheduler,
    ) -> Self {
        Self {
            store,
            resolver,
            names,
            scheduler,
        }
    }

    /// The identity store.
    pub fn store(&self) -> &IdentityStore {
        &self.store
    }

    /// The update scheduler.
    pub fn scheduler(&self) -> &UpdateScheduler {
        &self.scheduler
    }

    /// Requests an update after a role change.
    ///
    /// Changes that touch no mapped role are ignored. Returns true if an
    /// update was requested.
    pub fn role_changed(&self, before: &BTreeSet<String>, after: &BTreeSet<String>) -> bool {
        let changed = before
            .symmetric_difference(after)
            .find(|role| self.resolver.is_mapped_role(role));
        match changed {
            Some(role) => {
                info!(%role, "role update, scheduling whitelist update");
                self.scheduler.trigger();
                true
            }
            None => false,
        }
    }

    /// Links the account named `name` to `target`.
    ///
    /// # Errors
    ///
    /// - `UnknownPlayer` if no account has that name
    /// - `AlreadyOnUser` if it is already linked to `target`
    /// - `LinkedToOther` if another identity owns it
    /// - `LinkLimit` if `target` may not link another account
    pub async fn add_account(&self, target: &str, name: &str) -> AdminResult<Profile> {
        let uuid = self
            .names
            .resolve_uuid(name)
            .await?
            .ok_or_else(|| AdminError::UnknownPlayer(name.to_string()))?;

        let current = self.store.get_user(target);
        if current.uuids.contains(&uuid) {
            return Err(AdminError::AlreadyOnUser {
                name: name.to_string(),
                uuid,
            });
        }
        if let Some(linked) = self.store.get_linked_user(&uuid) {
            return Err(AdminError::LinkedToOther {
                name: name.to_string(),
                uuid,
                owner: linked.id,
            });
        }

        let member = self.resolver.fetch_member(target).await?.unwrap_or_default();
        if let Some(allowed) = self.resolver.allowed_links(&member) {
            if current.uuids.len() + 1 > allowed as usize {
                return Err(AdminError::LinkLimit { allowed });
            }
        }

        self.store
            .link_user(target, uuid)
            .map_err(|e| match e {
                StoreError::AlreadyLinked { uuid, owner } => AdminError::LinkedToOther {
                    name: name.to_string(),
                    uuid,
                    owner,
                },
                other => other.into(),
            })?;
        info!(identity = %target, %uuid, %name, "linked account");
        self.scheduler.trigger();
        Ok(Profile::new(uuid, name))
    }

    /// Unlinks one account from `target`.
    ///
    /// `uuid` may be dashed or undashed.
    pub async fn remove_account(&self, target: &str, uuid: &str) -> AdminResult<IdentityRecord> {
        let uuid = parse_uuid(uuid)?;
        let current = self.store.get_user(target);
        if current.uuids.is_empty() {
            return Err(AdminError::UnknownUser(target.to_string()));
        }
        if !current.uuids.contains(&uuid) {
            return Err(AdminError::NotLinked {
                id: target.to_string(),
                uuid,
            });
        }

        let record = self.store.unlink_user(target, uuid)?;
        info!(identity = %target, %uuid, "unlinked account");
        self.scheduler.trigger();
        Ok(record)
    }

    /// Unlinks every account of `target`.
    pub async fn remove_all(&self, target: &str) -> AdminResult<IdentityRecord> {
        if self.store.get_user(target).uuids.is_empty() {
            return Err(AdminError::UnknownUser(target.to_string()));
        }
        let record = self.store.remove_user(target)?;
        info!(identity = %target, accounts = record.uuids.len(), "removed all accounts");
        self.scheduler.trigger();
        Ok(record)
    }

    /// Bans or unbans `id`.
    pub async fn set_banned(&self, id: &str, banned: bool) -> AdminResult<IdentityRecord> {
        let record = self.store.set_banned(id, banned).map_err(|e| match e {
            StoreError::UnknownIdentity(id) => AdminError::UnknownUser(id),
            other => other.into(),
        })?;
        info!(identity = %id, banned, "ban state changed");
        self.scheduler.trigger();
        Ok(record)
    }

    /// Describes identity `id`.
    pub async fn info_by_user(&self, id: &str) -> AdminResult<UserInfo> {
        let record = self.store.get_user(id);
        if record.uuids.is_empty() {
            return Err(AdminError::UnknownUser(id.to_string()));
        }
        self.describe(id, record).await
    }

    /// Describes the identity owning `uuid`.
    pub async fn info_by_uuid(&self, uuid: &str) -> AdminResult<UserInfo> {
        let uuid = parse_uuid(uuid)?;
        let linked = self
            .store
            .get_linked_user(&uuid)
            .ok_or_else(|| AdminError::UnknownUser(uuid.to_string()))?;
        self.describe(&linked.id, linked.record).await
    }

    /// Describes the identity owning the account named `name`.
    pub async fn info_by_name(&self, name: &str) -> AdminResult<UserInfo> {
        let uuid = self
            .names
            .resolve_uuid(name)
            .await?
            .ok_or_else(|| AdminError::UnknownPlayer(name.to_string()))?;
        self.info_by_uuid(&uuid.to_string()).await
    }

    async fn describe(&self, id: &str, record: IdentityRecord) -> AdminResult<UserInfo> {
        let uuids: Vec<Uuid> = record.uuids.iter().copied().collect();
        let names = name_table(self.names.as_ref(), &uuids).await?;
        let member = self.resolver.fetch_member(id).await?;

        let profiles = uuids
            .iter()
            .map(|uuid| {
                let name = names
                    .get(uuid)
                    .cloned()
                    .unwrap_or_else(|| uuid.to_string());
                Profile::new(*uuid, name)
            })
            .collect();
        let (servers, allowed_links) = match &member {
            Some(member) => (
                self.resolver.servers_for_member(member),
                self.resolver.allowed_links(member),
            ),
            None => (BTreeSet::new(), Some(0)),
        };

        Ok(UserInfo {
            id: id.to_string(),
            profiles,
            banned: record.banned,
            servers,
            allowed_links,
            member: member.is_some(),
        })
    }

    /// Snapshot of every link, ban and removal with display names.
    pub async fn dump(&self) -> AdminResult<Dump> {
        let state = self.resolver.resolve(&self.store).await?;
        let banned = self.store.get_banned_uuids();
        let removed = self.store.removed();

        let uuids: Vec<Uuid> = state
            .owners
            .keys()
            .chain(removed.iter())
            .copied()
            .collect();
        let names: HashMap<Uuid, String> = name_table(self.names.as_ref(), &uuids).await?;

        let mut dump = Dump::default();
        for (uuid, id) in &state.owners {
            let user = dump.users.entry(id.clone()).or_insert_with(|| DumpUser {
                banned: false,
                uuids: BTreeMap::new(),
                servers: state.servers_by_identity.get(id).cloned(),
            });
            if banned.contains(uuid) {
                user.banned = true;
            }
            user.uuids.insert(*uuid, names.get(uuid).cloned());
        }
        for uuid in removed {
            dump.removed.insert(uuid, names.get(&uuid).cloned());
        }
        Ok(dump)
    }

    /// Re-reads the store, migrates legacy names and runs a pass.
    pub async fn reload(&self) -> AdminResult<ReconcileReport> {
        self.store.reload()?;
        migrate_legacy_names(&self.store, self.names.as_ref()).await?;
        info!("database reloaded");
        Ok(self.scheduler.trigger_and_wait().await?)
    }
}
