//! # wlsync Store
//!
//! Durable link store between external (Discord) identities and Minecraft
//! account UUIDs.
//!
//! The store is a single JSON document rewritten wholesale on every
//! mutation:
//!
//! ```text
//! {
//!   "users":   { "<identity id>": { "uuids": ["<uuid>", ...], "banned": true } },
//!   "removed": ["<uuid>", ...]
//! }
//! ```
//!
//! ## Key Invariants
//!
//! - A UUID is linked to at most one identity at any time
//! - A record whose last UUID is unlinked is deleted
//! - Every unlinked UUID is remembered in the removed set until relinked
//! - In-memory state always equals what was last persisted

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod error;
mod file;
mod record;
mod store;

pub use error::{StoreError, StoreResult};
pub use file::StoreFile;
pub use record::{IdentityRecord, LinkedUser, StoreDocument};
pub use store::IdentityStore;

use uuid::Uuid;

/// Parses a Minecraft UUID given in dashed or undashed form.
///
/// The returned value always formats in the canonical dashed form.
pub fn parse_uuid(input: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(input.trim()).map_err(|_| StoreError::InvalidUuid(input.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_uuid_accepts_both_forms() {
        let dashed = parse_uuid("11111111-2222-3333-4444-555555555555").unwrap();
        let plain = parse_uuid("11111111222233334444555555555555").unwrap();
        assert_eq!(dashed, plain);
        assert_eq!(plain.to_string(), "11111111-2222-3333-4444-555555555555");
    }

    #[test]
    fn parse_uuid_rejects_garbage() {
        assert!(matches!(
            parse_uuid("not-a-uuid"),
            Err(StoreError::InvalidUuid(_))
        ));
    }
}
