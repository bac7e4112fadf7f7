//! Persisted record types.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// The accounts linked to one external identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// Linked Minecraft accounts.
    #[serde(default)]
    pub uuids: BTreeSet<Uuid>,
    /// Legacy display names from before accounts were stored by UUID.
    ///
    /// Emptied by the name migration.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<String>,
    /// Whether the identity is banned from every server.
    #[serde(default, skip_serializing_if = "is_false")]
    pub banned: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl IdentityRecord {
    /// Returns true if no account is linked.
    pub fn is_empty(&self) -> bool {
        self.uuids.is_empty()
    }

    /// Returns true if the record still carries legacy names.
    pub fn has_legacy_names(&self) -> bool {
        !self.names.is_empty()
    }
}

/// An identity found by one of its linked UUIDs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedUser {
    /// The owning identity id.
    pub id: String,
    /// The owning identity's record.
    pub record: IdentityRecord,
}

/// The full persisted document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDocument {
    /// Records keyed by identity id.
    #[serde(default)]
    pub users: BTreeMap<String, IdentityRecord>,
    /// UUIDs that were linked once and have since been unlinked.
    #[serde(default)]
    pub removed: BTreeSet<Uuid>,
}

impl StoreDocument {
    /// Finds the identity owning `uuid`.
    pub fn owner_of(&self, uuid: &Uuid) -> Option<&str> {
        self.users
            .iter()
            .find(|(_, record)| record.uuids.contains(uuid))
            .map(|(id, _)| id.as_str())
    }

    /// Builds the inverse index `uuid -> identity id`.
    pub fn by_uuid(&self) -> BTreeMap<Uuid, String> {
        let mut index = BTreeMap::new();
        for (id, record) in &self.users {
            for uuid in &record.uuids {
                index.insert(*uuid, id.clone());
            }
        }
        index
    }

    /// Returns the UUIDs of every banned identity.
    pub fn banned_uuids(&self) -> BTreeSet<Uuid> {
        self.users
            .values()
            .filter(|record| record.banned)
            .flat_map(|record| record.uuids.iter().copied())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uuid(n: u8) -> Uuid {
        Uuid::from_bytes([n; 16])
    }

    #[test]
    fn document_json_layout() {
        let mut doc = StoreDocument::default();
        doc.users.insert(
            "42".into(),
            IdentityRecord {
                uuids: [uuid(1)].into_iter().collect(),
                ..Default::default()
            },
        );
        doc.removed.insert(uuid(2));

        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "users": { "42": { "uuids": ["01010101-0101-0101-0101-010101010101"] } },
                "removed": ["02020202-0202-0202-0202-020202020202"]
            })
        );
    }

    #[test]
    fn document_accepts_legacy_records() {
        let doc: StoreDocument =
            serde_json::from_str(r#"{"users": {"7": {"names": ["Steve"]}}}"#).unwrap();
        let record = &doc.users["7"];
        assert!(record.is_empty());
        assert!(record.has_legacy_names());
        assert!(doc.removed.is_empty());
    }

    #[test]
    fn inverse_index_and_bans() {
        let mut doc = StoreDocument::default();
        doc.users.insert(
            "a".into(),
            IdentityRecord {
                uuids: [uuid(1), uuid(2)].into_iter().collect(),
                banned: true,
                ..Default::default()
            },
        );
        doc.users.insert(
            "b".into(),
            IdentityRecord {
                uuids: [uuid(3)].into_iter().collect(),
                ..Default::default()
            },
        );

        let index = doc.by_uuid();
        assert_eq!(index.len(), 3);
        assert_eq!(index[&uuid(3)], "b");
        assert_eq!(doc.owner_of(&uuid(2)), Some("a"));
        assert_eq!(doc.owner_of(&uuid(9)), None);
        assert_eq!(doc.banned_uuids(), [uuid(1), uuid(2)].into_iter().collect());
    }
}
