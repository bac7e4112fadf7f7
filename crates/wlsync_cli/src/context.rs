//! Wiring shared by every command.

use crate::snapshot::{MembersFile, ProfilesFile};
use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use wlsync_engine::{
    GuildDirectory, ManagedServer, MembershipResolver, NameResolver, Reconciler, UpdateScheduler,
    WhitelistConfig, WhitelistService,
};
use wlsync_store::IdentityStore;
use wlsync_transport::RconPool;

/// Paths given on the command line.
pub struct Paths<'a> {
    /// Configuration document.
    pub config: &'a Path,
    /// Guild snapshot.
    pub members: &'a Path,
    /// Profile cache.
    pub profiles: &'a Path,
}

/// Loaded configuration, store and collaborators.
pub struct Context {
    /// Parsed configuration.
    pub config: WhitelistConfig,
    /// The identity store, locked for the life of the process.
    pub store: Arc<IdentityStore>,
    /// Profile lookups.
    pub names: Arc<dyn NameResolver>,
    directory: Arc<dyn GuildDirectory>,
    servers: Vec<ManagedServer>,
}

impl Context {
    /// Loads the configuration and opens the store.
    pub fn open(paths: &Paths<'_>) -> Result<Self, Box<dyn Error>> {
        let config = WhitelistConfig::load(paths.config)?;
        let store = IdentityStore::open(&config.database)?;
        let servers = config.build_servers(&RconPool::new());
        info!(
            database = %config.database.display(),
            servers = servers.len(),
            "loaded configuration"
        );

        Ok(Self {
            config,
            store: Arc::new(store),
            names: Arc::new(ProfilesFile::new(paths.profiles)),
            directory: Arc::new(MembersFile::new(paths.members)),
            servers,
        })
    }

    /// A resolver over the configured roles and servers.
    pub fn resolver(&self) -> Arc<MembershipResolver> {
        Arc::new(MembershipResolver::new(
            self.config.roles.clone(),
            self.servers.iter().map(|s| s.id().to_string()).collect(),
            Arc::clone(&self.directory),
        ))
    }

    /// A reconciler over the configured servers.
    pub fn reconciler(&self) -> Arc<Reconciler> {
        Arc::new(Reconciler::new(
            Arc::clone(&self.store),
            self.resolver(),
            Arc::clone(&self.names),
            self.servers.clone(),
        ))
    }

    /// A service with its own scheduler.
    pub fn service(&self, debounce: Duration) -> WhitelistService {
        let scheduler = UpdateScheduler::start(self.reconciler(), debounce);
        WhitelistService::new(
            Arc::clone(&self.store),
            self.resolver(),
            Arc::clone(&self.names),
            scheduler,
        )
    }
}
