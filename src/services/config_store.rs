use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::{
    dao::models::{
        BASE_SHARDS, BANNED_WORDS_FILE, BannedWordsDocument, GROUPS_FILE, GroupsDocument,
        PLAYER_DATA_FILE, PLUGIN_FILE, PlayerDataDocument, PluginDocument, SAMPLE_FILE,
        SERVERS_FILE, SampleDocument, ServersDocument, ShardSet,
    },
    services::persistence::{PersistenceError, WriteBehindCache},
    state::snapshot::{ConfigSnapshot, ConfigViolation, PlayerTable},
};

/// Errors raised while loading or saving the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The snapshot failed validation; the first violation is shown.
    #[error("invalid configuration: {}", first_violation(.0))]
    Invalid(Vec<ConfigViolation>),
    /// A shard could not be read, decoded or queued.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

fn first_violation(violations: &[ConfigViolation]) -> String {
    violations
        .first()
        .map(ToString::to_string)
        .unwrap_or_else(|| "unknown violation".into())
}

/// Owner of the authoritative [`ConfigSnapshot`].
///
/// Readers receive cheap `Arc` clones; a new snapshot is only installed after
/// it has been validated.
pub struct ConfigStore {
    cache: Arc<WriteBehindCache>,
    current: watch::Sender<Arc<ConfigSnapshot>>,
    players_revision: AtomicU64,
}

impl ConfigStore {
    /// Create a store holding the factory sample until [`Self::init`] runs.
    pub fn new(cache: Arc<WriteBehindCache>) -> Self {
        let (current, _rx) = watch::channel(Arc::new(ConfigSnapshot::sample()));
        Self {
            cache,
            current,
            players_revision: AtomicU64::new(0),
        }
    }

    /// The snapshot currently in effect.
    pub fn current(&self) -> Arc<ConfigSnapshot> {
        self.current.borrow().clone()
    }

    /// Subscribe to snapshot replacements.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ConfigSnapshot>> {
        self.current.subscribe()
    }

    /// Make `snapshot` the effective configuration.
    pub fn install(&self, snapshot: Arc<ConfigSnapshot>) {
        self.current.send_replace(snapshot);
    }

    /// Counter bumped by every [`Self::store_players`] call.
    pub fn players_revision(&self) -> u64 {
        self.players_revision.load(Ordering::SeqCst)
    }

    /// Backing cache, shared with other persisted state.
    pub fn cache(&self) -> &Arc<WriteBehindCache> {
        &self.cache
    }

    /// Prepare the data directory and install the first snapshot.
    ///
    /// Missing base shards cause every base shard to be seeded from the sample;
    /// shards with missing fields are backfilled and re-saved.
    pub async fn init(&self) -> Result<Arc<ConfigSnapshot>, ConfigError> {
        let sample = ConfigSnapshot::sample();
        if self.cache.read_raw(SAMPLE_FILE).await?.is_none() {
            info!(file = SAMPLE_FILE, "writing configuration sample");
            self.cache
                .immediate_write(SAMPLE_FILE, &SampleDocument::from(&sample))
                .await?;
        }

        let mut missing = Vec::new();
        for key in BASE_SHARDS {
            let present = self
                .cache
                .read_raw(key)
                .await?
                .is_some_and(|raw| !raw.trim().is_empty());
            if !present {
                missing.push(key);
            }
        }

        let snapshot = if missing.is_empty() {
            let (snapshot, backfilled) = self.read_shards().await?;
            let violations = snapshot.validate();
            if !violations.is_empty() {
                return Err(ConfigError::Invalid(violations));
            }
            if !backfilled.is_empty() {
                info!(fields = ?backfilled, "backfilled configuration from sample");
                self.queue_shards(&snapshot).await?;
            }
            snapshot
        } else {
            warn!(files = ?missing, "configuration incomplete; seeding from sample");
            let mut seeded = self.read_sample().await?;
            // Known players survive a reseed of the base shards.
            if let Some(players) = self
                .cache
                .read::<PlayerDataDocument>(PLAYER_DATA_FILE)
                .await?
                .and_then(|doc| doc.players)
            {
                seeded.players = players;
            }
            self.write_shards_now(&seeded).await?;
            seeded
        };

        let snapshot = Arc::new(snapshot);
        self.install(snapshot.clone());
        info!(
            servers = snapshot.servers.len(),
            groups = snapshot.groups.len(),
            "configuration loaded"
        );
        Ok(snapshot)
    }

    /// Read every shard (queued payloads first), merge and validate without installing.
    pub async fn load_merged(&self) -> Result<ConfigSnapshot, ConfigError> {
        let (snapshot, backfilled) = self.read_shards().await?;
        if !backfilled.is_empty() {
            warn!(fields = ?backfilled, "configuration fields missing; using sample values");
        }
        let violations = snapshot.validate();
        if !violations.is_empty() {
            return Err(ConfigError::Invalid(violations));
        }
        Ok(snapshot)
    }

    /// Validate `snapshot`, queue one write per shard and install it.
    pub async fn save_split(&self, snapshot: ConfigSnapshot) -> Result<(), ConfigError> {
        let violations = snapshot.validate();
        if !violations.is_empty() {
            return Err(ConfigError::Invalid(violations));
        }
        self.queue_shards(&snapshot).await?;
        self.install(Arc::new(snapshot));
        Ok(())
    }

    /// Replace the player shard of the current snapshot and queue it for writing.
    pub async fn store_players(&self, players: PlayerTable) -> Result<(), ConfigError> {
        let document = PlayerDataDocument {
            players: Some(players.clone()),
        };
        self.cache.queue_write(PLAYER_DATA_FILE, &document).await?;
        self.players_revision.fetch_add(1, Ordering::SeqCst);
        self.current.send_modify(|current| {
            let mut next = ConfigSnapshot::clone(&**current);
            next.players = players;
            *current = Arc::new(next);
        });
        Ok(())
    }

    async fn read_shards(&self) -> Result<(ConfigSnapshot, Vec<&'static str>), ConfigError> {
        let sample = self.read_sample().await?;
        let shards = ShardSet {
            plugin: self.read_or_default::<PluginDocument>(PLUGIN_FILE).await?,
            groups: self.read_or_default::<GroupsDocument>(GROUPS_FILE).await?,
            servers: self.read_or_default::<ServersDocument>(SERVERS_FILE).await?,
            banned_words: self
                .read_or_default::<BannedWordsDocument>(BANNED_WORDS_FILE)
                .await?,
            players: self
                .read_or_default::<PlayerDataDocument>(PLAYER_DATA_FILE)
                .await?,
        };
        Ok(shards.merge(&sample))
    }

    /// Sample contents from disk, with any gaps filled from the built-in defaults.
    async fn read_sample(&self) -> Result<ConfigSnapshot, ConfigError> {
        let builtin = ConfigSnapshot::sample();
        let Some(document) = self.cache.read::<SampleDocument>(SAMPLE_FILE).await? else {
            return Ok(builtin);
        };
        let (sample, _) = ShardSet::from(document).merge(&builtin);
        Ok(sample)
    }

    async fn read_or_default<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        Ok(self.cache.read::<T>(key).await?.unwrap_or_default())
    }

    async fn queue_shards(&self, snapshot: &ConfigSnapshot) -> Result<(), PersistenceError> {
        self.cache
            .queue_write(PLUGIN_FILE, &PluginDocument::from(snapshot))
            .await?;
        self.cache
            .queue_write(GROUPS_FILE, &GroupsDocument::from(snapshot))
            .await?;
        self.cache
            .queue_write(SERVERS_FILE, &ServersDocument::from(snapshot))
            .await?;
        self.cache
            .queue_write(BANNED_WORDS_FILE, &BannedWordsDocument::from(snapshot))
            .await?;
        self.cache
            .queue_write(PLAYER_DATA_FILE, &PlayerDataDocument::from(snapshot))
            .await?;
        Ok(())
    }

    async fn write_shards_now(&self, snapshot: &ConfigSnapshot) -> Result<(), PersistenceError> {
        self.cache
            .immediate_write(PLUGIN_FILE, &PluginDocument::from(snapshot))
            .await?;
        self.cache
            .immediate_write(GROUPS_FILE, &GroupsDocument::from(snapshot))
            .await?;
        self.cache
            .immediate_write(SERVERS_FILE, &ServersDocument::from(snapshot))
            .await?;
        self.cache
            .immediate_write(BANNED_WORDS_FILE, &BannedWordsDocument::from(snapshot))
            .await?;
        self.cache
            .immediate_write(PLAYER_DATA_FILE, &PlayerDataDocument::from(snapshot))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::file_store::{MemoryFileStore, YamlDirStore},
        state::snapshot::ServerDescriptor,
    };

    fn store_over(files: &MemoryFileStore) -> ConfigStore {
        let cache = Arc::new(WriteBehindCache::new(Arc::new(files.clone()), 50));
        ConfigStore::new(cache)
    }

    #[tokio::test]
    async fn init_seeds_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(WriteBehindCache::new(
            Arc::new(YamlDirStore::new(dir.path())),
            50,
        ));
        let store = ConfigStore::new(cache);

        let snapshot = store.init().await.unwrap();
        assert_eq!(*snapshot, ConfigSnapshot::sample());
        for file in [SAMPLE_FILE, PLUGIN_FILE, GROUPS_FILE, SERVERS_FILE, PLAYER_DATA_FILE] {
            assert!(dir.path().join(file).exists(), "{file} missing");
        }
    }

    #[tokio::test]
    async fn init_backfills_missing_fields() {
        let files = MemoryFileStore::new();
        files.insert(PLUGIN_FILE, "ws_port: 2000\n");
        files.insert(GROUPS_FILE, "groups: []\n");
        files.insert(SERVERS_FILE, "servers: []\n");
        files.insert(BANNED_WORDS_FILE, "words: []\n");
        let store = store_over(&files);

        let snapshot = store.init().await.unwrap();
        assert_eq!(snapshot.ingress.port, 2000);
        assert_eq!(snapshot.ingress.path, "/yz/v3/mcqq");
        assert!(snapshot.servers.is_empty());
        assert_eq!(store.cache().pending().await, 5);
    }

    #[tokio::test]
    async fn invalid_shards_are_rejected() {
        let files = MemoryFileStore::new();
        store_over(&files).init().await.unwrap();
        files.insert(PLUGIN_FILE, "ws_path: no-slash\n");
        let store = store_over(&files);

        let err = store.load_merged().await.unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("no-slash"));
    }

    #[tokio::test]
    async fn save_split_installs_and_reads_back_before_flush() {
        let files = MemoryFileStore::new();
        let store = store_over(&files);
        store.init().await.unwrap();
        let writes_after_init = files.write_count();

        let mut next = ConfigSnapshot::clone(&store.current());
        next.servers.push(ServerDescriptor {
            name: "alpha".into(),
            ..ServerDescriptor::default()
        });
        store.save_split(next.clone()).await.unwrap();

        assert_eq!(*store.current(), next);
        assert_eq!(files.write_count(), writes_after_init);
        assert_eq!(store.load_merged().await.unwrap(), next);
    }

    #[tokio::test]
    async fn reseed_keeps_known_players() {
        let files = MemoryFileStore::new();
        files.insert(
            PLAYER_DATA_FILE,
            "players:\n  alpha:\n  - uuid: u-1\n    name: Alice\n",
        );
        let store = store_over(&files);

        let snapshot = store.init().await.unwrap();
        assert_eq!(snapshot.players["alpha"][0].name, "Alice");
    }
}
