//! Reconciliation of server whitelists against resolved authorization.
//!
//! One pass resolves authorization once, then handles every server
//! independently and concurrently:
//!
//! 1. read and parse `whitelist.json`
//! 2. keep unmanaged entries, keep or drop managed ones, append additions
//! 3. if anything changed, write the file, then run deop/kick for each
//!    removal, op for each addition (if `opEveryone`) and `whitelist reload`
//!
//! A failure on one server is logged and recorded in the report; it never
//! stops the others.

use crate::directory::{name_table, NameResolver};
use crate::error::{EngineError, EngineResult};
use crate::resolver::{Authorization, MembershipResolver};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{error, info};
use uuid::Uuid;
use wlsync_store::IdentityStore;
use wlsync_transport::{CommandChannel, FileAccess};

/// Name of the whitelist file beneath each server root.
pub const WHITELIST_FILE: &str = "whitelist.json";

/// One entry of a server's whitelist file.
///
/// Fields other than `uuid` and `name` are carried through untouched. An
/// entry missing either field is still accepted; without a uuid it is never
/// managed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhitelistEntry {
    /// Account UUID as written in the file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    /// Display name snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl WhitelistEntry {
    /// Creates an entry.
    pub fn new(uuid: Uuid, name: impl Into<String>) -> Self {
        Self {
            uuid: Some(uuid.to_string()),
            name: Some(name.into()),
            extra: serde_json::Map::new(),
        }
    }

    /// The parsed account UUID, if the entry holds a valid one.
    pub fn account(&self) -> Option<Uuid> {
        self.uuid
            .as_deref()
            .and_then(|uuid| Uuid::parse_str(uuid).ok())
    }

    /// The name used in console commands: the snapshot, else the uuid.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.uuid.as_deref())
            .unwrap_or_default()
    }
}

/// A server the engine keeps in sync.
#[derive(Clone)]
pub struct ManagedServer {
    id: String,
    files: Arc<dyn FileAccess>,
    commands: Arc<dyn CommandChannel>,
    op_everyone: bool,
}

impl std::fmt::Debug for ManagedServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedServer")
            .field("id", &self.id)
            .field("files", &self.files.describe())
            .field("commands", &self.commands.describe())
            .field("op_everyone", &self.op_everyone)
            .finish()
    }
}

impl ManagedServer {
    /// Creates a server from its transports.
    pub fn new(
        id: impl Into<String>,
        files: Arc<dyn FileAccess>,
        commands: Arc<dyn CommandChannel>,
    ) -> Self {
        Self {
            id: id.into(),
            files,
            commands,
            op_everyone: false,
        }
    }

    /// Sets the `opEveryone` flag.
    pub fn with_op_everyone(mut self, op_everyone: bool) -> Self {
        self.op_everyone = op_everyone;
        self
    }

    /// Server id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether added accounts are made operator.
    pub fn op_everyone(&self) -> bool {
        self.op_everyone
    }
}

/// The changes one server needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerPlan {
    /// The complete new whitelist.
    pub entries: Vec<WhitelistEntry>,
    /// Entries appended for newly authorized accounts.
    pub additions: Vec<WhitelistEntry>,
    /// Entries dropped for de-authorized accounts, named for commands.
    pub removals: Vec<WhitelistEntry>,
}

impl ServerPlan {
    /// Returns true if the whitelist is already correct.
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }

    /// Commands to run after the file is written.
    pub fn commands(&self, op_everyone: bool) -> Vec<String> {
        let mut commands = Vec::with_capacity(self.removals.len() * 2 + self.additions.len() + 1);
        for entry in &self.removals {
            commands.push(format!("deop {}", entry.display_name()));
            commands.push(format!("kick {}", entry.display_name()));
        }
        if op_everyone {
            for entry in &self.additions {
                commands.push(format!("op {}", entry.display_name()));
            }
        }
        commands.push("whitelist reload".to_string());
        commands
    }
}

/// Diffs `current` against `authorization` for server `server_id`.
///
/// `names` supplies display names; additions fall back to the UUID and
/// removals to the name already in the file.
pub fn plan_server(
    server_id: &str,
    current: Vec<WhitelistEntry>,
    authorization: &Authorization,
    names: &HashMap<Uuid, String>,
) -> ServerPlan {
    let mut plan = ServerPlan::default();
    let mut present = BTreeSet::new();

    for entry in current {
        let managed = entry
            .account()
            .and_then(|uuid| authorization.get(&uuid).map(|servers| (uuid, servers)));
        let Some((uuid, servers)) = managed else {
            plan.entries.push(entry);
            continue;
        };
        if servers.contains(server_id) {
            present.insert(uuid);
            plan.entries.push(entry);
        } else {
            let mut removed = entry;
            if let Some(name) = names.get(&uuid) {
                removed.name = Some(name.clone());
            }
            plan.removals.push(removed);
        }
    }

    for (uuid, servers) in authorization {
        if present.contains(uuid) || !servers.contains(server_id) {
            continue;
        }
        let name = names
            .get(uuid)
            .cloned()
            .unwrap_or_else(|| uuid.to_string());
        let entry = WhitelistEntry::new(*uuid, name);
        plan.entries.push(entry.clone());
        plan.additions.push(entry);
    }

    plan
}

/// What happened to one server in a pass.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerOutcome {
    /// The whitelist was already correct.
    Unchanged,
    /// The whitelist was rewritten and commands were issued.
    Updated {
        /// Added entries.
        additions: Vec<WhitelistEntry>,
        /// Removed entries.
        removals: Vec<WhitelistEntry>,
        /// Commands issued, in order.
        commands: Vec<String>,
    },
    /// The server was skipped for this pass.
    Failed(String),
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    /// Outcome per server id.
    pub servers: BTreeMap<String, ServerOutcome>,
    /// Wall time of the pass.
    pub duration: Duration,
}

impl ReconcileReport {
    /// Ids of servers whose whitelist changed.
    pub fn updated(&self) -> Vec<&str> {
        self.servers
            .iter()
            .filter(|(_, outcome)| matches!(outcome, ServerOutcome::Updated { .. }))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Ids of servers that failed.
    pub fn failed(&self) -> Vec<&str> {
        self.servers
            .iter()
            .filter(|(_, outcome)| matches!(outcome, ServerOutcome::Failed(_)))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Number of commands issued across all servers.
    pub fn command_count(&self) -> usize {
        self.servers
            .values()
            .map(|outcome| match outcome {
                ServerOutcome::Updated { commands, .. } => commands.len(),
                _ => 0,
            })
            .sum()
    }
}

/// Runs reconciliation passes over a fixed set of servers.
pub struct Reconciler {
    store: Arc<IdentityStore>,
    resolver: Arc<MembershipResolver>,
    names: Arc<dyn NameResolver>,
    servers: Vec<ManagedServer>,
}

impl Reconciler {
    /// Creates a reconciler.
    pub fn new(
        store: Arc<IdentityStore>,
        resolver: Arc<MembershipResolver>,
        names: Arc<dyn NameResolver>,
        servers: Vec<ManagedServer>,
    ) -> Self {
        Self {
            store,
            resolver,
            names,
            servers,
        }
    }

    /// Configured servers.
    pub fn servers(&self) -> &[ManagedServer] {
        &self.servers
    }

    /// Runs one pass over every server.
    ///
    /// # Errors
    ///
    /// Fails only if authorization or names cannot be resolved; per-server
    /// failures are reported in the result.
    pub async fn reconcile(&self) -> EngineResult<ReconcileReport> {
        info!(servers = self.servers.len(), "updating whitelists");
        let start = Instant::now();

        let state = self.resolver.resolve(&self.store).await?;
        let uuids: Vec<Uuid> = state.authorization.keys().copied().collect();
        let names = name_table(self.names.as_ref(), &uuids).await?;

        let authorization = Arc::new(state.authorization);
        let names = Arc::new(names);
        let mut tasks = JoinSet::new();
        for server in &self.servers {
            let server = server.clone();
            let authorization = Arc::clone(&authorization);
            let names = Arc::clone(&names);
            tasks.spawn(async move {
                let outcome = match reconcile_server(&server, &authorization, &names).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(server = %server.id, error = %e, "could not update server");
                        ServerOutcome::Failed(e.to_string())
                    }
                };
                (server.id, outcome)
            });
        }

        let mut report = ReconcileReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, outcome)) => {
                    report.servers.insert(id, outcome);
                }
                Err(e) => error!(error = %e, "server update task failed"),
            }
        }

        report.duration = start.elapsed();
        info!(
            updated = report.updated().len(),
            failed = report.failed().len(),
            duration_ms = report.duration.as_millis() as u64,
            "whitelist update done"
        );
        Ok(report)
    }
}

async fn reconcile_server(
    server: &ManagedServer,
    authorization: &Authorization,
    names: &HashMap<Uuid, String>,
) -> EngineResult<ServerOutcome> {
    let raw = server
        .files
        .read_file(WHITELIST_FILE)
        .await
        .map_err(|e| EngineError::transport(&server.id, e))?;
    let current: Vec<WhitelistEntry> =
        serde_json::from_slice(&raw).map_err(|e| EngineError::MalformedWhitelist {
            server: server.id.clone(),
            message: e.to_string(),
        })?;

    let plan = plan_server(&server.id, current, authorization, names);
    if plan.is_empty() {
        return Ok(ServerOutcome::Unchanged);
    }

    info!(
        server = %server.id,
        additions = ?plan.additions.iter().filter_map(|e| e.uuid.as_deref()).collect::<Vec<_>>(),
        removals = ?plan.removals.iter().filter_map(|e| e.uuid.as_deref()).collect::<Vec<_>>(),
        "updating whitelist"
    );

    let data =
        serde_json::to_vec_pretty(&plan.entries).map_err(|e| EngineError::MalformedWhitelist {
            server: server.id.clone(),
            message: e.to_string(),
        })?;
    server
        .files
        .write_file(WHITELIST_FILE, &data)
        .await
        .map_err(|e| EngineError::transport(&server.id, e))?;

    let commands = plan.commands(server.op_everyone);
    server
        .commands
        .run_commands(&commands)
        .await
        .map_err(|e| EngineError::transport(&server.id, e))?;

    Ok(ServerOutcome::Updated {
        additions: plan.additions,
        removals: plan.removals,
        commands,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uuid(n: u8) -> Uuid {
        Uuid::from_bytes([n; 16])
    }

    fn servers(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn entry_keeps_unknown_fields() {
        let json = r#"[{"uuid":"not-a-uuid","name":"Odd","note":"keep me"}]"#;
        let entries: Vec<WhitelistEntry> = serde_json::from_str(json).unwrap();
        assert_eq!(entries[0].account(), None);
        let back = serde_json::to_value(&entries).unwrap();
        assert_eq!(back[0]["note"], "keep me");
    }

    #[test]
    fn incomplete_entries_are_kept_unmanaged() {
        let json = format!(
            r#"[{{"name":"NoUuid"}},{{"uuid":"{}","name":null}},{{"uuid":"{}"}}]"#,
            uuid(1),
            uuid(2)
        );
        let current: Vec<WhitelistEntry> = serde_json::from_str(&json).unwrap();
        assert_eq!(current[0].account(), None);
        assert_eq!(current[1].display_name(), uuid(1).to_string());

        let auth = Authorization::from([(uuid(1), servers(&[])), (uuid(3), servers(&["s1"]))]);
        let plan = plan_server("s1", current, &auth, &HashMap::new());

        assert_eq!(plan.removals.len(), 1);
        assert_eq!(
            plan.commands(false)[..2],
            [format!("deop {}", uuid(1)), format!("kick {}", uuid(1))]
        );
        let written = serde_json::to_value(&plan.entries).unwrap();
        assert_eq!(written[0], serde_json::json!({"name": "NoUuid"}));
        assert_eq!(written[1], serde_json::json!({"uuid": uuid(2).to_string()}));
        assert_eq!(plan.additions, vec![WhitelistEntry::new(uuid(3), uuid(3).to_string())]);
    }

    #[test]
    fn plan_keeps_removes_and_adds() {
        let auth = Authorization::from([
            (uuid(1), servers(&["s1"])),
            (uuid(2), servers(&["s2"])),
            (uuid(3), servers(&["s1", "s2"])),
            (uuid(4), servers(&[])),
        ]);
        let names = HashMap::from([(uuid(2), "Alex".to_string()), (uuid(3), "Sam".to_string())]);
        let current = vec![
            WhitelistEntry::new(uuid(1), "Steve"),
            WhitelistEntry::new(uuid(2), "OldAlex"),
            WhitelistEntry::new(uuid(9), "Stranger"),
            WhitelistEntry::new(uuid(4), "Gone"),
        ];

        let plan = plan_server("s1", current, &auth, &names);

        let kept: Vec<&str> = plan.entries.iter().map(WhitelistEntry::display_name).collect();
        assert_eq!(kept, vec!["Steve", "Stranger", "Sam"]);
        let removed: Vec<&str> = plan.removals.iter().map(WhitelistEntry::display_name).collect();
        assert_eq!(removed, vec!["Alex", "Gone"]);
        assert_eq!(plan.additions, vec![WhitelistEntry::new(uuid(3), "Sam")]);
    }

    #[test]
    fn addition_without_name_uses_uuid() {
        let auth = Authorization::from([(uuid(5), servers(&["s1"]))]);
        let plan = plan_server("s1", Vec::new(), &auth, &HashMap::new());
        assert_eq!(plan.additions[0].display_name(), uuid(5).to_string());
    }

    #[test]
    fn correct_whitelist_plans_nothing() {
        let auth = Authorization::from([(uuid(1), servers(&["s1"]))]);
        let current = vec![WhitelistEntry::new(uuid(1), "Steve")];
        assert!(plan_server("s1", current, &auth, &HashMap::new()).is_empty());
    }

    #[test]
    fn command_order() {
        let plan = ServerPlan {
            entries: Vec::new(),
            additions: vec![WhitelistEntry::new(uuid(3), "Sam")],
            removals: vec![
                WhitelistEntry::new(uuid(1), "Steve"),
                WhitelistEntry::new(uuid(2), "Alex"),
            ],
        };
        assert_eq!(
            plan.commands(false),
            vec!["deop Steve", "kick Steve", "deop Alex", "kick Alex", "whitelist reload"]
        );
        assert_eq!(
            plan.commands(true),
            vec![
                "deop Steve",
                "kick Steve",
                "deop Alex",
                "kick Alex",
                "op Sam",
                "whitelist reload"
            ]
        );
    }

    #[test]
    fn report_summaries() {
        let report = ReconcileReport {
            servers: BTreeMap::from([
                ("a".to_string(), ServerOutcome::Unchanged),
                (
                    "b".to_string(),
                    ServerOutcome::Updated {
                        additions: Vec::new(),
                        removals: Vec::new(),
                        commands: vec!["whitelist reload".to_string()],
                    },
                ),
                ("c".to_string(), ServerOutcome::Failed("boom".to_string())),
            ]),
            duration: Duration::ZERO,
        };
        assert_eq!(report.updated(), vec!["b"]);
        assert_eq!(report.failed(), vec!["c"]);
        assert_eq!(report.command_count(), 1);
    }
}
