//! # wlsync Testkit
//!
//! Test doubles and fixtures for wlsync.
//!
//! This crate provides:
//! - [`MemoryFiles`] - an in-memory [`FileAccess`](wlsync_transport::FileAccess)
//!   with failure injection
//! - [`RecordingChannel`] - a [`CommandChannel`](wlsync_transport::CommandChannel)
//!   that records every batch
//! - [`StaticDirectory`] and [`StaticNames`] - fixed collaborators
//! - [`Scenario`] - a store, collaborators and fake servers wired together
//!
//! ## Usage
//!
//! ```rust,ignore
//! use wlsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn adds_linked_account() {
//!     let scenario = Scenario::new(&["s1"]).with_role("member", RoleGrant::new(["s1"]));
//!     scenario.member("42", &["member"]);
//!     scenario.store.link_user("42", uuid(1)).unwrap();
//!     scenario.reconciler().reconcile().await.unwrap();
//!     assert_eq!(scenario.server("s1").whitelist().len(), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod collaborators;
pub mod fixtures;
pub mod transports;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::collaborators::*;
    pub use crate::fixtures::*;
    pub use crate::transports::*;
    pub use wlsync_engine::RoleGrant;
}

pub use collaborators::*;
pub use fixtures::*;
pub use transports::*;
