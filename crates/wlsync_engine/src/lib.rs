//! # wlsync Engine
//!
//! Keeps Minecraft server whitelists in line with Discord role membership.
//!
//! This crate provides:
//! - Configuration loading ([`WhitelistConfig`])
//! - Collaborator interfaces for role membership and name lookup
//!   ([`GuildDirectory`], [`NameResolver`])
//! - The membership resolver computing authorized servers per account
//! - The reconciliation engine diffing and updating every server
//! - A debounced, single-flight update scheduler
//! - Admin operations used by front ends ([`WhitelistService`])
//!
//! ## Control flow
//!
//! ```text
//! role change / admin command
//!        │
//!        ▼
//! UpdateScheduler ──(debounce)──► Reconciler::reconcile
//!                                     │
//!                    ┌────────────────┼─────────────────┐
//!                    ▼                ▼                 ▼
//!          MembershipResolver     server A          server B  ...
//!          (store + guild)     read/diff/write    read/diff/write
//!                               + commands         + commands
//! ```
//!
//! ## Guarantees
//!
//! - At most one reconciliation pass runs at a time
//! - A failure on one server never stops the others
//! - Unmanaged whitelist entries are never touched
//! - Banned and removed accounts are purged regardless of roles

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod directory;
mod error;
mod reconcile;
mod resolver;
mod scheduler;
mod service;

pub use config::{
    CommandBackend, FileBackend, RoleGrant, ServerSpec, WhitelistConfig, DEFAULT_DEBOUNCE,
};
pub use directory::{GuildDirectory, GuildMember, NameResolver, Profile, MEMBER_BATCH_SIZE};
pub use error::{AdminError, AdminResult, ConfigError, ConfigResult, EngineError, EngineResult};
pub use reconcile::{
    plan_server, ManagedServer, ReconcileReport, Reconciler, ServerOutcome, ServerPlan,
    WhitelistEntry, WHITELIST_FILE,
};
pub use resolver::{Authorization, LinkCap, MembershipResolver, ResolvedState};
pub use scheduler::{PassRecord, ReconcileTask, SchedulerState, UpdateScheduler};
pub use service::{migrate_legacy_names, Dump, DumpUser, UserInfo, WhitelistService};
