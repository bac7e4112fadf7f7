//! Scenario fixture wiring a store, collaborators and fake servers.

use crate::collaborators::{StaticDirectory, StaticNames};
use crate::transports::{MemoryFiles, RecordingChannel};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;
use wlsync_engine::{
    ManagedServer, MembershipResolver, Reconciler, RoleGrant, UpdateScheduler, WhitelistEntry,
    WhitelistService,
};
use wlsync_store::IdentityStore;

/// A deterministic UUID whose bytes are all `n`.
pub fn uuid(n: u8) -> Uuid {
    Uuid::from_bytes([n; 16])
}

/// One fake server.
#[derive(Debug, Clone)]
pub struct FakeServer {
    /// Its whitelist storage.
    pub files: Arc<MemoryFiles>,
    /// Its console.
    pub commands: Arc<RecordingChannel>,
    /// Whether added accounts are made operator.
    pub op_everyone: bool,
}

impl FakeServer {
    /// Creates a server with an empty whitelist.
    pub fn new() -> Self {
        Self {
            files: Arc::new(MemoryFiles::with_whitelist(&[])),
            commands: Arc::new(RecordingChannel::new()),
            op_everyone: false,
        }
    }

    /// Parsed whitelist.
    pub fn whitelist(&self) -> Vec<WhitelistEntry> {
        self.files.whitelist()
    }

    /// UUIDs on the whitelist, in file order.
    pub fn whitelisted(&self) -> Vec<String> {
        self.whitelist().into_iter().filter_map(|e| e.uuid).collect()
    }

    /// All commands issued so far.
    pub fn issued(&self) -> Vec<String> {
        self.commands.commands()
    }
}

impl Default for FakeServer {
    fn default() -> Self {
        Self::new()
    }
}

/// A complete engine setup on fakes.
///
/// The identity store lives in a temporary directory removed on drop.
pub struct Scenario {
    /// The identity store.
    pub store: Arc<IdentityStore>,
    /// The guild.
    pub directory: Arc<StaticDirectory>,
    /// Known Minecraft profiles.
    pub names: Arc<StaticNames>,
    /// Fake servers by id.
    pub servers: BTreeMap<String, FakeServer>,
    /// Role grants by role id.
    pub roles: BTreeMap<String, RoleGrant>,
    _dir: TempDir,
}

impl Scenario {
    /// Creates a scenario with an empty store and one fake server per id.
    pub fn new(server_ids: &[&str]) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let store = IdentityStore::open(&dir.path().join("whitelist.json"))
            .expect("Failed to open identity store");
        Self {
            store: Arc::new(store),
            directory: Arc::new(StaticDirectory::new()),
            names: Arc::new(StaticNames::new()),
            servers: server_ids
                .iter()
                .map(|id| (id.to_string(), FakeServer::new()))
                .collect(),
            roles: BTreeMap::new(),
            _dir: dir,
        }
    }

    /// Adds a role grant.
    pub fn with_role(mut self, role: &str, grant: RoleGrant) -> Self {
        self.roles.insert(role.to_string(), grant);
        self
    }

    /// Sets `opEveryone` on server `id`.
    pub fn with_op_everyone(mut self, id: &str) -> Self {
        if let Some(server) = self.servers.get_mut(id) {
            server.op_everyone = true;
        }
        self
    }

    /// Adds a guild member holding `roles`.
    pub fn member(&self, id: &str, roles: &[&str]) {
        self.directory.set_member(id, roles);
    }

    /// Adds a Minecraft profile.
    pub fn player(&self, uuid: Uuid, name: &str) {
        self.names.add(uuid, name);
    }

    /// The fake server `id`.
    pub fn server(&self, id: &str) -> &FakeServer {
        &self.servers[id]
    }

    /// A resolver over the scenario's roles and servers.
    pub fn resolver(&self) -> Arc<MembershipResolver> {
        Arc::new(MembershipResolver::new(
            self.roles.clone(),
            self.servers.keys().cloned().collect(),
            self.directory.clone(),
        ))
    }

    /// The fake servers as managed servers.
    pub fn managed_servers(&self) -> Vec<ManagedServer> {
        self.servers
            .iter()
            .map(|(id, server)| {
                ManagedServer::new(id.clone(), server.files.clone(), server.commands.clone())
                    .with_op_everyone(server.op_everyone)
            })
            .collect()
    }

    /// A reconciler over the scenario.
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.store.clone(),
            self.resolver(),
            self.names.clone(),
            self.managed_servers(),
        )
    }

    /// A service whose scheduler runs this scenario's reconciler.
    ///
    /// Must be called inside a tokio runtime.
    pub fn service(&self, debounce: Duration) -> WhitelistService {
        let scheduler = UpdateScheduler::start(Arc::new(self.reconciler()), debounce);
        WhitelistService::new(
            self.store.clone(),
            self.resolver(),
            self.names.clone(),
            scheduler,
        )
    }
}
