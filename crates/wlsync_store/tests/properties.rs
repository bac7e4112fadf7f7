//! Property tests for the identity store invariants.

use proptest::prelude::*;
use std::collections::HashMap;
use tempfile::tempdir;
use uuid::Uuid;
use wlsync_store::{IdentityStore, StoreError};

#[derive(Debug, Clone)]
enum Op {
    Link(u8, u8),
    Unlink(u8, u8),
    Remove(u8),
    Ban(u8, bool),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..3, 0u8..6).prop_map(|(id, u)| Op::Link(id, u)),
        2 => (0u8..3, 0u8..6).prop_map(|(id, u)| Op::Unlink(id, u)),
        1 => (0u8..3).prop_map(Op::Remove),
        1 => (0u8..3, any::<bool>()).prop_map(|(id, b)| Op::Ban(id, b)),
    ]
}

fn uuid(n: u8) -> Uuid {
    Uuid::from_bytes([n + 1; 16])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn uuid_never_linked_twice(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let dir = tempdir().unwrap();
        let store = IdentityStore::open(&dir.path().join("whitelist.json")).unwrap();

        for op in ops {
            match op {
                Op::Link(id, u) => {
                    match store.link_user(&id.to_string(), uuid(u)) {
                        Ok(record) => prop_assert!(record.uuids.contains(&uuid(u))),
                        Err(StoreError::AlreadyLinked { owner, .. }) => {
                            prop_assert_ne!(owner, id.to_string())
                        }
                        Err(e) => return Err(TestCaseError::fail(e.to_string())),
                    }
                }
                Op::Unlink(id, u) => {
                    store.unlink_user(&id.to_string(), uuid(u)).unwrap();
                    prop_assert!(store.removed().contains(&uuid(u)) || store.get_linked_user(&uuid(u)).is_some());
                }
                Op::Remove(id) => {
                    let id = id.to_string();
                    if store.get_user(&id).is_empty() {
                        continue;
                    }
                    let record = store.remove_user(&id).unwrap();
                    let removed = store.removed();
                    for u in &record.uuids {
                        prop_assert!(removed.contains(u));
                    }
                }
                Op::Ban(id, banned) => {
                    let _ = store.set_banned(&id.to_string(), banned);
                }
            }

            let snapshot = store.snapshot();
            let mut seen: HashMap<Uuid, &String> = HashMap::new();
            for (id, record) in &snapshot.users {
                prop_assert!(!record.uuids.is_empty());
                for u in &record.uuids {
                    prop_assert!(seen.insert(*u, id).is_none(), "{} linked twice", u);
                    prop_assert!(!snapshot.removed.contains(u));
                }
            }
        }

        // What is in memory is what is on disk
        let persisted = store.snapshot();
        store.reload().unwrap();
        prop_assert_eq!(store.snapshot(), persisted);
    }
}
