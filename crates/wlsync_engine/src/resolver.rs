//! Membership resolution: which servers each known account may be on.

use crate::config::RoleGrant;
use crate::directory::{GuildDirectory, GuildMember, MEMBER_BATCH_SIZE};
use crate::error::EngineResult;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;
use wlsync_store::IdentityStore;

/// Authorized servers per managed account.
///
/// An account absent from the map is unmanaged. An account mapped to the
/// empty set is actively removed from every server.
pub type Authorization = BTreeMap<Uuid, BTreeSet<String>>;

/// Link cap of one identity. `None` is unlimited.
pub type LinkCap = Option<u32>;

/// A resolved authorization together with what it was derived from.
#[derive(Debug, Clone, Default)]
pub struct ResolvedState {
    /// Authorized servers per managed account.
    pub authorization: Authorization,
    /// Owner of every linked account.
    pub owners: BTreeMap<Uuid, String>,
    /// Servers granted to every identity that is a guild member.
    pub servers_by_identity: BTreeMap<String, BTreeSet<String>>,
}

/// Derives server authorization from role membership and the identity store.
pub struct MembershipResolver {
    roles: BTreeMap<String, RoleGrant>,
    server_ids: Vec<String>,
    directory: Arc<dyn GuildDirectory>,
}

impl MembershipResolver {
    /// Creates a resolver.
    ///
    /// `server_ids` is the live set group globs are expanded against.
    pub fn new(
        roles: BTreeMap<String, RoleGrant>,
        server_ids: Vec<String>,
        directory: Arc<dyn GuildDirectory>,
    ) -> Self {
        Self {
            roles,
            server_ids,
            directory,
        }
    }

    /// Returns true if `role` grants anything.
    pub fn is_mapped_role(&self, role: &str) -> bool {
        self.roles.contains_key(role)
    }

    /// Expands one server id or `*.suffix` group.
    pub fn expand(&self, pattern: &str) -> Vec<String> {
        match pattern.strip_prefix("*.") {
            Some(suffix) => self
                .server_ids
                .iter()
                .filter(|id| id.ends_with(suffix))
                .cloned()
                .collect(),
            None => vec![pattern.to_string()],
        }
    }

    /// Servers reachable through any of `member`'s mapped roles.
    pub fn servers_for_member(&self, member: &GuildMember) -> BTreeSet<String> {
        self.roles
            .iter()
            .filter(|(role, _)| member.roles.contains(*role))
            .flat_map(|(_, grant)| grant.servers.iter())
            .flat_map(|pattern| self.expand(pattern))
            .collect()
    }

    /// Link cap of `member`: the largest over its mapped roles.
    ///
    /// Zero without any mapped role.
    pub fn allowed_links(&self, member: &GuildMember) -> LinkCap {
        let mut cap = Some(0);
        for (role, grant) in &self.roles {
            if !member.roles.contains(role) {
                continue;
            }
            cap = match (cap, grant.allowed_links) {
                (None, _) | (_, None) => None,
                (Some(current), Some(allowed)) => Some(current.max(allowed)),
            };
        }
        cap
    }

    /// Fetches one member.
    pub async fn fetch_member(&self, id: &str) -> EngineResult<Option<GuildMember>> {
        let mut members = self.directory.fetch_members(&[id.to_string()]).await?;
        Ok(members.remove(id))
    }

    /// Fetches members in batches of at most [`MEMBER_BATCH_SIZE`].
    pub async fn fetch_members(&self, ids: &[String]) -> EngineResult<HashMap<String, GuildMember>> {
        let mut members = HashMap::with_capacity(ids.len());
        for batch in ids.chunks(MEMBER_BATCH_SIZE) {
            members.extend(self.directory.fetch_members(batch).await?);
        }
        Ok(members)
    }

    /// Computes the authorization of every account the store knows.
    ///
    /// Accounts of identities that are not guild members are skipped with a
    /// warning and stay unmanaged. Removed and banned accounts always map to
    /// the empty set.
    pub async fn resolve(&self, store: &IdentityStore) -> EngineResult<ResolvedState> {
        let snapshot = store.snapshot();
        let owners = snapshot.by_uuid();
        let ids: Vec<String> = snapshot.users.keys().cloned().collect();
        let members = self.fetch_members(&ids).await?;

        let servers_by_identity: BTreeMap<String, BTreeSet<String>> = members
            .iter()
            .map(|(id, member)| (id.clone(), self.servers_for_member(member)))
            .collect();

        let mut authorization = Authorization::new();
        for uuid in &snapshot.removed {
            authorization.insert(*uuid, BTreeSet::new());
        }
        for (uuid, id) in &owners {
            match servers_by_identity.get(id) {
                Some(servers) => {
                    authorization.insert(*uuid, servers.clone());
                }
                None => warn!(%uuid, identity = %id, "could not find servers, not a guild member"),
            }
        }
        for uuid in snapshot.banned_uuids() {
            authorization.insert(uuid, BTreeSet::new());
        }

        Ok(ResolvedState {
            authorization,
            owners,
            servers_by_identity,
        })
    }
}
