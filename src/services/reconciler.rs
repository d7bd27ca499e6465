use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::{
    dto::admin::ReloadReport,
    services::{
        banned_words::BannedWordFilter,
        config_store::{ConfigError, ConfigStore},
        console_pool::ConnectionPool,
        identity::IdentityIndex,
        ingress::{IngressError, SessionRegistry},
    },
    state::snapshot::ConfigSnapshot,
};

/// Names added, removed and modified between two snapshots, in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityChanges {
    /// Only in the new snapshot.
    pub added: Vec<String>,
    /// Only in the old snapshot.
    pub removed: Vec<String>,
    /// In both with different settings.
    pub modified: Vec<String>,
}

impl EntityChanges {
    /// Whether nothing was added, removed or modified.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// Structured difference between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Ingress port, path or command prefix differ.
    pub ingress_changed: bool,
    /// Server entries by name.
    pub servers: EntityChanges,
    /// Group entries by id.
    pub groups: EntityChanges,
    /// Banned words or their replacement differ.
    pub banned_words_changed: bool,
    /// The player shard differs.
    pub players_changed: bool,
}

impl ChangeSet {
    /// Whether the snapshots are equivalent.
    pub fn is_empty(&self) -> bool {
        !self.ingress_changed
            && self.servers.is_empty()
            && self.groups.is_empty()
            && !self.banned_words_changed
            && !self.players_changed
    }
}

/// Compare two snapshots, servers keyed by name and groups keyed by id.
pub fn diff(old: &ConfigSnapshot, new: &ConfigSnapshot) -> ChangeSet {
    ChangeSet {
        ingress_changed: old.ingress != new.ingress,
        servers: diff_entities(
            old.servers.iter().map(|server| (server.name.as_str(), server)),
            new.servers.iter().map(|server| (server.name.as_str(), server)),
        ),
        groups: diff_entities(
            old.groups.iter().map(|group| (group.id.as_str(), group)),
            new.groups.iter().map(|group| (group.id.as_str(), group)),
        ),
        banned_words_changed: old.banned_words != new.banned_words,
        players_changed: old.players != new.players,
    }
}

fn diff_entities<'a, T, O, N>(old: O, new: N) -> EntityChanges
where
    T: PartialEq + 'a,
    O: Iterator<Item = (&'a str, &'a T)>,
    N: Iterator<Item = (&'a str, &'a T)>,
{
    let old: Vec<_> = old.collect();
    let new: Vec<_> = new.collect();

    let mut changes = EntityChanges::default();
    for (key, value) in &new {
        match lookup(&old, key) {
            None => changes.added.push(key.to_string()),
            Some(previous) if previous != *value => changes.modified.push(key.to_string()),
            Some(_) => {}
        }
    }
    for (key, _) in &old {
        if lookup(&new, key).is_none() {
            changes.removed.push(key.to_string());
        }
    }
    changes
}

fn lookup<'a, T>(items: &[(&'a str, &'a T)], key: &str) -> Option<&'a T> {
    items
        .iter()
        .find(|(candidate, _)| *candidate == key)
        .map(|(_, value)| *value)
}

/// A structural change could not be applied.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The listener could not be moved to the new settings.
    #[error("failed to restart ingress listener")]
    IngressRestart(#[source] IngressError),
}

/// Failures of a configuration reload. The previous snapshot stays in effect.
#[derive(Debug, Error)]
pub enum ReloadError {
    /// Another reload holds the gate.
    #[error("a reload is already in progress")]
    AlreadyReloading,
    /// The files on disk could not be read or failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Live state could not be converged.
    #[error(transparent)]
    Apply(#[from] ApplyError),
}

/// Converges live connections and caches to a newly loaded snapshot.
pub struct Reconciler {
    registry: Arc<SessionRegistry>,
    pool: Arc<ConnectionPool>,
    identity: Arc<IdentityIndex>,
    banned_words: Arc<BannedWordFilter>,
}

impl Reconciler {
    /// Bundle the components a reload converges.
    pub fn new(
        registry: Arc<SessionRegistry>,
        pool: Arc<ConnectionPool>,
        identity: Arc<IdentityIndex>,
        banned_words: Arc<BannedWordFilter>,
    ) -> Self {
        Self {
            registry,
            pool,
            identity,
            banned_words,
        }
    }

    /// Apply `changes` so live state matches `new`.
    ///
    /// An ingress restart is attempted first; if it fails nothing else is touched
    /// and the listener is brought back with `old`'s settings.
    pub async fn apply(
        &self,
        changes: &ChangeSet,
        old: &ConfigSnapshot,
        new: &ConfigSnapshot,
    ) -> Result<(), ApplyError> {
        if changes.ingress_changed {
            info!(port = new.ingress.port, path = %new.ingress.path, "ingress settings changed; restarting listener");
            if let Err(err) = self.registry.restart(&new.ingress).await {
                error!(error = %err, "ingress restart failed; restoring previous listener");
                if let Err(restore) = self.registry.start(&old.ingress).await {
                    error!(error = %restore, "previous ingress listener could not be restored");
                }
                return Err(ApplyError::IngressRestart(err));
            }
            // The restart dropped every session; only stale console entries remain.
            for name in &changes.servers.removed {
                self.pool.remove(name).await;
            }
        } else {
            for name in &changes.servers.removed {
                self.registry.close_session(name).await;
                info!(server = %name, "server removed");
            }
        }

        for name in &changes.servers.modified {
            let Some(descriptor) = new.server(name) else {
                continue;
            };
            if descriptor.is_complete() {
                if self.pool.upsert(descriptor.clone()).await {
                    info!(server = %name, "console settings updated; reconnecting lazily");
                }
            } else if self.pool.remove(name).await {
                warn!(server = %name, "console settings incomplete; entry dropped");
            }
        }

        if !changes.servers.added.is_empty() {
            info!(servers = ?changes.servers.added, "servers added; connecting on first use");
        }
        if changes.banned_words_changed {
            self.banned_words.reload(new.banned_words.clone());
        }
        Ok(())
    }

    /// Install `new` together with its player shard.
    ///
    /// Player records committed after `players_revision` was taken win over the
    /// shard that was read from disk.
    pub async fn install(&self, new: ConfigSnapshot, players_revision: u64) -> Arc<ConfigSnapshot> {
        self.identity.install_reloaded(new, players_revision).await
    }
}

/// Single-flight configuration reload with rollback.
pub struct Reloader {
    config: Arc<ConfigStore>,
    reconciler: Reconciler,
    gate: Mutex<()>,
}

impl Reloader {
    /// Create a reloader with an open gate.
    pub fn new(config: Arc<ConfigStore>, reconciler: Reconciler) -> Self {
        Self {
            config,
            reconciler,
            gate: Mutex::new(()),
        }
    }

    /// Load, validate, diff and apply the configuration on disk.
    pub async fn reload(&self) -> Result<ReloadReport, ReloadError> {
        let _gate = self
            .gate
            .try_lock()
            .map_err(|_| ReloadError::AlreadyReloading)?;

        info!("reloading configuration");
        let old = self.config.current();
        let players_revision = self.config.players_revision();
        let new = self.config.load_merged().await.inspect_err(|err| {
            warn!(error = %err, "reload aborted; keeping current configuration");
        })?;

        let changes = diff(&old, &new);
        if changes.is_empty() {
            info!("configuration unchanged");
            return Ok(ReloadReport::new(&changes, &new));
        }

        self.reconciler.apply(&changes, &old, &new).await?;
        let report = ReloadReport::new(&changes, &new);
        self.reconciler.install(new, players_revision).await;
        info!(
            servers_added = report.servers.added.len(),
            servers_removed = report.servers.removed.len(),
            servers_modified = report.servers.modified.len(),
            ingress_restarted = report.ingress_changed,
            "configuration reloaded"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::{
            file_store::MemoryFileStore,
            models::{PLUGIN_FILE, SERVERS_FILE, ServersDocument},
            rcon::testing::{MockConsole, MockReply},
        },
        services::persistence::WriteBehindCache,
        state::{
            console::ConsolePhase,
            snapshot::{GroupConfig, PlayerRecord, ServerDescriptor},
        },
    };
    use proptest::prelude::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn server(name: &str, port: u16) -> ServerDescriptor {
        ServerDescriptor {
            name: name.into(),
            prefix: name[..1].into(),
            host: "127.0.0.1".into(),
            port: Some(port),
            secret: "pw".into(),
            allowed_commands: vec!["list".into()],
        }
    }

    #[test]
    fn diff_reports_added_removed_and_modified() {
        let mut old = ConfigSnapshot::sample();
        old.servers = vec![server("alpha", 1), server("beta", 2)];
        let mut new = old.clone();
        new.servers = vec![server("beta", 3), server("gamma", 4)];
        new.groups.push(GroupConfig {
            id: "500".into(),
            ..GroupConfig::default()
        });
        new.banned_words.replacement = "#".into();

        let changes = diff(&old, &new);
        assert_eq!(changes.servers.added, ["gamma"]);
        assert_eq!(changes.servers.removed, ["alpha"]);
        assert_eq!(changes.servers.modified, ["beta"]);
        assert_eq!(changes.groups.added, ["500"]);
        assert!(changes.banned_words_changed);
        assert!(!changes.ingress_changed);
        assert!(!changes.players_changed);
    }

    fn any_snapshot() -> impl Strategy<Value = ConfigSnapshot> {
        let servers = prop::collection::btree_map("[a-d]", (1u16..5, "[a-z]{0,3}"), 0..4);
        let groups = prop::collection::btree_map("[0-9]{1,3}", any::<bool>(), 0..4);
        (servers, groups, 1u16..u16::MAX).prop_map(|(servers, groups, port)| {
            let mut snapshot = ConfigSnapshot::sample();
            snapshot.ingress.port = port;
            snapshot.servers = servers
                .into_iter()
                .map(|(name, (port, secret))| ServerDescriptor {
                    secret,
                    ..server(&name, port)
                })
                .collect();
            snapshot.groups = groups
                .into_iter()
                .map(|(id, sync_all)| GroupConfig {
                    id,
                    sync_all,
                    ..GroupConfig::default()
                })
                .collect();
            snapshot
        })
    }

    proptest! {
        #[test]
        fn diff_of_identical_snapshots_is_empty(snapshot in any_snapshot()) {
            prop_assert!(diff(&snapshot, &snapshot).is_empty());
        }
    }

    struct Harness {
        files: MemoryFileStore,
        config: Arc<ConfigStore>,
        registry: Arc<SessionRegistry>,
        pool: Arc<ConnectionPool>,
        identity: Arc<IdentityIndex>,
        reloader: Reloader,
        _events: mpsc::UnboundedReceiver<crate::state::event::IngressEvent>,
    }

    async fn harness(servers: Vec<ServerDescriptor>) -> Harness {
        let files = MemoryFileStore::new();
        let config = Arc::new(ConfigStore::new(Arc::new(WriteBehindCache::new(
            Arc::new(files.clone()),
            50,
        ))));
        config.init().await.unwrap();
        let mut snapshot = ConfigSnapshot::clone(&config.current());
        snapshot.servers.extend(servers);
        config.save_split(snapshot).await.unwrap();

        let pool = Arc::new(ConnectionPool::new(
            config.subscribe(),
            Duration::from_secs(1),
        ));
        let (events_tx, events) = mpsc::unbounded_channel();
        let registry = Arc::new(SessionRegistry::new(pool.clone(), events_tx));
        let identity = Arc::new(IdentityIndex::new(config.clone()));
        let banned = Arc::new(BannedWordFilter::new(
            config.current().banned_words.clone(),
        ));
        let reconciler = Reconciler::new(registry.clone(), pool.clone(), identity.clone(), banned);
        let reloader = Reloader::new(config.clone(), reconciler);
        Harness {
            files,
            config,
            registry,
            pool,
            identity,
            reloader,
            _events: events,
        }
    }

    fn write_servers(files: &MemoryFileStore, servers: Vec<ServerDescriptor>) {
        let document = ServersDocument {
            servers: Some(servers),
        };
        files.insert(SERVERS_FILE, serde_yaml::to_string(&document).unwrap());
    }

    #[tokio::test]
    async fn unchanged_configuration_reloads_to_empty_report() {
        let harness = harness(Vec::new()).await;
        harness.config.cache().force_flush().await;
        let report = harness.reloader.reload().await.unwrap();
        assert!(report.servers.added.is_empty());
        assert!(!report.ingress_changed);
    }

    #[tokio::test]
    async fn modified_server_only_reconnects_when_link_settings_change() {
        let console = MockConsole::start("pw", MockReply::Echo).await;
        let alpha = server("alpha", console.port());
        let harness = harness(vec![alpha.clone()]).await;
        harness.config.cache().force_flush().await;

        let entry = harness.pool.get("alpha").unwrap();
        harness.pool.connect(&entry).await.unwrap();

        let mut changed = alpha.clone();
        changed.allowed_commands.push("say".into());
        write_servers(&harness.files, vec![changed.clone(), server("beta", 1)]);

        let report = harness.reloader.reload().await.unwrap();
        assert_eq!(report.servers.modified, ["alpha"]);
        assert_eq!(report.servers.added, ["beta"]);
        assert_eq!(entry.phase().await, ConsolePhase::Disconnected);
        assert!(harness.pool.existing("beta").is_none());
        assert_eq!(harness.config.current().server("alpha"), Some(&changed));
    }

    #[tokio::test]
    async fn removed_server_drops_console_entry() {
        let harness = harness(vec![server("alpha", 1)]).await;
        harness.config.cache().force_flush().await;
        harness.pool.get("alpha").unwrap();

        write_servers(&harness.files, Vec::new());
        let report = harness.reloader.reload().await.unwrap();
        assert_eq!(report.servers.removed, ["default_server", "alpha"]);
        assert!(harness.pool.is_empty());
    }

    #[tokio::test]
    async fn player_changes_rebuild_identity_index() {
        let harness = harness(Vec::new()).await;
        harness.config.cache().force_flush().await;
        harness.files.insert(
            crate::dao::models::PLAYER_DATA_FILE,
            serde_yaml::to_string(&crate::dao::models::PlayerDataDocument {
                players: Some(
                    [(
                        "alpha".to_string(),
                        vec![PlayerRecord {
                            uuid: "u-1".into(),
                            name: "Alice".into(),
                            operator: true,
                            accounts: Vec::new(),
                            updated_at: String::new(),
                        }],
                    )]
                    .into_iter()
                    .collect(),
                ),
            })
            .unwrap(),
        );

        let report = harness.reloader.reload().await.unwrap();
        assert!(report.players_changed);
        assert!(harness.identity.is_operator("Alice", Some("alpha")));
    }

    #[tokio::test]
    async fn invalid_configuration_keeps_previous_snapshot() {
        let harness = harness(Vec::new()).await;
        harness.config.cache().force_flush().await;
        let before = harness.config.current();
        harness.files.insert(PLUGIN_FILE, "ws_path: nope\n");

        let err = harness.reloader.reload().await.unwrap_err();
        assert!(matches!(err, ReloadError::Config(ConfigError::Invalid(_))));
        assert!(Arc::ptr_eq(&before, &harness.config.current()));
    }

    #[tokio::test]
    async fn concurrent_reload_is_rejected() {
        let harness = harness(Vec::new()).await;
        let _held = harness.reloader.gate.lock().await;
        assert!(matches!(
            harness.reloader.reload().await,
            Err(ReloadError::AlreadyReloading)
        ));
    }

    #[tokio::test]
    async fn failed_ingress_restart_rolls_back() {
        let harness = harness(Vec::new()).await;
        harness.config.cache().force_flush().await;

        let mut running = ConfigSnapshot::clone(&harness.config.current());
        running.ingress.port = 0;
        let running = Arc::new(running);
        harness.config.install(running.clone());
        harness.registry.start(&running.ingress).await.unwrap();

        let blocker = tokio::net::TcpListener::bind("0.0.0.0:0").await.unwrap();
        let taken = blocker.local_addr().unwrap().port();
        harness.files.insert(
            PLUGIN_FILE,
            format!(
                "ws_path: /yz/v3/mcqq\nws_port: {taken}\ncommand_prefix: /\nserver_to_group: says\ngroup_to_server: says\n"
            ),
        );

        let err = harness.reloader.reload().await.unwrap_err();
        assert!(matches!(err, ReloadError::Apply(ApplyError::IngressRestart(_))));
        assert!(Arc::ptr_eq(&running, &harness.config.current()));
        assert!(harness.registry.is_running().await);
        harness.registry.stop().await;
    }
}
