//! The identity store.

use crate::error::{StoreError, StoreResult};
use crate::file::StoreFile;
use crate::record::{IdentityRecord, LinkedUser, StoreDocument};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, warn};
use uuid::Uuid;

/// Links external identities to Minecraft accounts.
///
/// Every mutation runs load-mutate-persist inside one critical section and
/// only replaces the in-memory document once the new version is on disk.
/// Readers therefore always see the last persisted state.
///
/// # Example
///
/// ```no_run
/// use wlsync_store::IdentityStore;
/// use std::path::Path;
///
/// let store = IdentityStore::open(Path::new("whitelist.json")).unwrap();
/// let uuid = wlsync_store::parse_uuid("11111111-1111-1111-1111-111111111111").unwrap();
/// store.link_user("42", uuid).unwrap();
/// assert!(store.get_user("42").uuids.contains(&uuid));
/// ```
#[derive(Debug)]
pub struct IdentityStore {
    file: StoreFile,
    document: Mutex<StoreDocument>,
}

impl IdentityStore {
    /// Opens the store at `path`, creating an empty document if missing.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let file = StoreFile::open(path)?;
        let document = normalize(file.load()?);
        file.save(&document)?;

        Ok(Self {
            file,
            document: Mutex::new(document),
        })
    }

    /// Returns the path of the backing document.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Discards in-memory state and re-reads the document from disk.
    pub fn reload(&self) -> StoreResult<()> {
        let mut document = self.document.lock();
        *document = normalize(self.file.load()?);
        debug!(users = document.users.len(), "reloaded identity store");
        Ok(())
    }

    /// Returns a point-in-time copy of the whole document.
    pub fn snapshot(&self) -> StoreDocument {
        self.document.lock().clone()
    }

    /// Returns the record for `id`, or an empty record if absent.
    pub fn get_user(&self, id: &str) -> IdentityRecord {
        self.document
            .lock()
            .users
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    /// Finds the identity that owns `uuid`.
    pub fn get_linked_user(&self, uuid: &Uuid) -> Option<LinkedUser> {
        let document = self.document.lock();
        document
            .users
            .iter()
            .find(|(_, record)| record.uuids.contains(uuid))
            .map(|(id, record)| LinkedUser {
                id: id.clone(),
                record: record.clone(),
            })
    }

    /// Returns the inverse index `uuid -> identity id`.
    pub fn get_all_by_uuid(&self) -> BTreeMap<Uuid, String> {
        self.document.lock().by_uuid()
    }

    /// Returns the UUIDs of every banned identity.
    pub fn get_banned_uuids(&self) -> BTreeSet<Uuid> {
        self.document.lock().banned_uuids()
    }

    /// Returns the UUIDs that were unlinked and not linked again since.
    pub fn removed(&self) -> BTreeSet<Uuid> {
        self.document.lock().removed.clone()
    }

    /// Links `uuid` to `id`.
    ///
    /// Linking an already linked pair is a no-op apart from the write.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyLinked` if another identity owns `uuid`.
    pub fn link_user(&self, id: &str, uuid: Uuid) -> StoreResult<IdentityRecord> {
        self.mutate(|document| {
            if let Some(owner) = document.owner_of(&uuid) {
                if owner != id {
                    return Err(StoreError::AlreadyLinked {
                        uuid,
                        owner: owner.to_string(),
                    });
                }
            }

            let record = document.users.entry(id.to_string()).or_default();
            record.uuids.insert(uuid);
            let record = record.clone();
            document.removed.remove(&uuid);
            Ok(record)
        })
    }

    /// Unlinks `uuid` from `id`.
    ///
    /// The record is deleted when its last account goes. The UUID is
    /// remembered as removed unless a different identity owns it.
    pub fn unlink_user(&self, id: &str, uuid: Uuid) -> StoreResult<IdentityRecord> {
        self.mutate(|document| {
            let mut record = document.users.remove(id).unwrap_or_default();
            record.uuids.remove(&uuid);
            if !record.is_empty() || record.has_legacy_names() {
                document.users.insert(id.to_string(), record.clone());
            }
            if document.owner_of(&uuid).is_none() {
                document.removed.insert(uuid);
            }
            Ok(record)
        })
    }

    /// Deletes the record of `id`, marking all its accounts removed.
    ///
    /// # Errors
    ///
    /// Returns `UnknownIdentity` if `id` has no record.
    pub fn remove_user(&self, id: &str) -> StoreResult<IdentityRecord> {
        self.mutate(|document| {
            let record = document
                .users
                .remove(id)
                .ok_or_else(|| StoreError::UnknownIdentity(id.to_string()))?;
            document.removed.extend(record.uuids.iter().copied());
            Ok(record)
        })
    }

    /// Sets the ban flag of `id`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownIdentity` if `id` has no record.
    pub fn set_banned(&self, id: &str, banned: bool) -> StoreResult<IdentityRecord> {
        self.mutate(|document| {
            let record = document
                .users
                .get_mut(id)
                .ok_or_else(|| StoreError::UnknownIdentity(id.to_string()))?;
            record.banned = banned;
            Ok(record.clone())
        })
    }

    /// Returns every legacy display name still stored in a record.
    pub fn legacy_names(&self) -> BTreeSet<String> {
        self.document
            .lock()
            .users
            .values()
            .flat_map(|record| record.names.iter().cloned())
            .collect()
    }

    /// Replaces legacy names by the UUIDs they resolved to.
    ///
    /// `resolved` is keyed by lowercased name. Names missing from it are
    /// dropped with a warning. Returns false if there was nothing to migrate.
    pub fn complete_name_migration(&self, resolved: &HashMap<String, Uuid>) -> StoreResult<bool> {
        self.mutate(|document| {
            if !document.users.values().any(IdentityRecord::has_legacy_names) {
                return Ok(false);
            }

            let mut additions = Vec::new();
            for (id, record) in document.users.iter_mut() {
                for name in std::mem::take(&mut record.names) {
                    match resolved.get(&name.to_lowercase()) {
                        Some(uuid) => additions.push((id.clone(), *uuid)),
                        None => warn!(%name, "invalid username, skipping"),
                    }
                }
            }

            for (id, uuid) in additions {
                if let Some(owner) = document.owner_of(&uuid) {
                    if owner != id {
                        warn!(%uuid, %owner, identity = %id, "legacy name already linked elsewhere, skipping");
                        continue;
                    }
                }
                if let Some(record) = document.users.get_mut(&id) {
                    record.uuids.insert(uuid);
                }
                document.removed.remove(&uuid);
            }
            document.users.retain(|_, record| !record.is_empty());
            Ok(true)
        })
    }

    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut StoreDocument) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut document = self.document.lock();
        let mut next = document.clone();
        let result = f(&mut next)?;
        self.file.save(&next)?;
        *document = next;
        Ok(result)
    }
}

/// Drops records that hold neither accounts nor legacy names.
fn normalize(mut document: StoreDocument) -> StoreDocument {
    document
        .users
        .retain(|_, record| !record.is_empty() || record.has_legacy_names());
    document
}
