use serde::{Deserialize, Serialize};

use crate::state::snapshot::{
    BannedWordSettings, ConfigSnapshot, GroupConfig, IngressSettings, PlayerTable, RelaySettings,
    ServerDescriptor,
};

/// Base ingress and separator settings.
pub const PLUGIN_FILE: &str = "1-plugin.yml";
/// Group routing rules.
pub const GROUPS_FILE: &str = "2-groups.yaml";
/// Game server descriptors.
pub const SERVERS_FILE: &str = "3-servers.yml";
/// Banned words and their replacement.
pub const BANNED_WORDS_FILE: &str = "4-banned-words.yml";
/// Player identity records.
pub const PLAYER_DATA_FILE: &str = "5-player-data.yml";
/// Factory defaults used to seed and backfill the other files.
pub const SAMPLE_FILE: &str = "sample.yaml";

/// Shards that must exist for a configuration to be considered present.
pub const BASE_SHARDS: [&str; 4] = [PLUGIN_FILE, GROUPS_FILE, SERVERS_FILE, BANNED_WORDS_FILE];

/// Contents of [`PLUGIN_FILE`]. Every field is optional so gaps can be backfilled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDocument {
    /// WebSocket path game servers connect to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_path: Option<String>,
    /// WebSocket listener port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_port: Option<u16>,
    /// Prefix that marks a chat line as a console command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_prefix: Option<String>,
    /// Separator used when relaying game chat to groups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_to_group: Option<String>,
    /// Separator used when relaying group chat into games.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_to_server: Option<String>,
}

/// Contents of [`GROUPS_FILE`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupsDocument {
    /// Configured chat groups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<GroupConfig>>,
}

/// Contents of [`SERVERS_FILE`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServersDocument {
    /// Configured game servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servers: Option<Vec<ServerDescriptor>>,
}

/// Contents of [`BANNED_WORDS_FILE`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BannedWordsDocument {
    /// Words masked in relayed text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<String>>,
    /// Text substituted for each banned word.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
}

/// Contents of [`PLAYER_DATA_FILE`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerDataDocument {
    /// Known players keyed by server name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub players: Option<PlayerTable>,
}

/// Contents of [`SAMPLE_FILE`]: every shard flattened into one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleDocument {
    /// Listener and relay settings.
    #[serde(flatten)]
    pub plugin: PluginDocument,
    /// Group list.
    #[serde(flatten)]
    pub groups: GroupsDocument,
    /// Server list.
    #[serde(flatten)]
    pub servers: ServersDocument,
    /// Banned-word list.
    #[serde(flatten)]
    pub banned_words: BannedWordsDocument,
    /// Player data.
    #[serde(flatten)]
    pub players: PlayerDataDocument,
}

impl From<&ConfigSnapshot> for PluginDocument {
    fn from(snapshot: &ConfigSnapshot) -> Self {
        Self {
            ws_path: Some(snapshot.ingress.path.clone()),
            ws_port: Some(snapshot.ingress.port),
            command_prefix: Some(snapshot.ingress.command_prefix.clone()),
            server_to_group: Some(snapshot.relay.server_to_group.clone()),
            group_to_server: Some(snapshot.relay.group_to_server.clone()),
        }
    }
}

impl From<&ConfigSnapshot> for GroupsDocument {
    fn from(snapshot: &ConfigSnapshot) -> Self {
        Self {
            groups: Some(snapshot.groups.clone()),
        }
    }
}

impl From<&ConfigSnapshot> for ServersDocument {
    fn from(snapshot: &ConfigSnapshot) -> Self {
        Self {
            servers: Some(snapshot.servers.clone()),
        }
    }
}

impl From<&ConfigSnapshot> for BannedWordsDocument {
    fn from(snapshot: &ConfigSnapshot) -> Self {
        Self {
            words: Some(snapshot.banned_words.words.clone()),
            replacement: Some(snapshot.banned_words.replacement.clone()),
        }
    }
}

impl From<&ConfigSnapshot> for PlayerDataDocument {
    fn from(snapshot: &ConfigSnapshot) -> Self {
        Self {
            players: Some(snapshot.players.clone()),
        }
    }
}

impl From<&ConfigSnapshot> for SampleDocument {
    fn from(snapshot: &ConfigSnapshot) -> Self {
        Self {
            plugin: snapshot.into(),
            groups: snapshot.into(),
            servers: snapshot.into(),
            banned_words: snapshot.into(),
            players: snapshot.into(),
        }
    }
}

/// Shard documents read from storage, before merging.
#[derive(Debug, Clone, Default)]
pub struct ShardSet {
    /// Plugin shard.
    pub plugin: PluginDocument,
    /// Groups shard.
    pub groups: GroupsDocument,
    /// Servers shard.
    pub servers: ServersDocument,
    /// Banned-words shard.
    pub banned_words: BannedWordsDocument,
    /// Player-data shard.
    pub players: PlayerDataDocument,
}

impl ShardSet {
    /// Merge the shards into a snapshot, filling every missing field from `defaults`.
    ///
    /// Returns the snapshot and the names of the fields that had to be backfilled.
    pub fn merge(self, defaults: &ConfigSnapshot) -> (ConfigSnapshot, Vec<&'static str>) {
        let mut backfilled = Vec::new();

        fn take<T: Clone>(
            value: Option<T>,
            fallback: &T,
            field: &'static str,
            backfilled: &mut Vec<&'static str>,
        ) -> T {
            value.unwrap_or_else(|| {
                backfilled.push(field);
                fallback.clone()
            })
        }

        let ingress = IngressSettings {
            path: take(
                self.plugin.ws_path,
                &defaults.ingress.path,
                "ws_path",
                &mut backfilled,
            ),
            port: take(
                self.plugin.ws_port,
                &defaults.ingress.port,
                "ws_port",
                &mut backfilled,
            ),
            command_prefix: take(
                self.plugin.command_prefix,
                &defaults.ingress.command_prefix,
                "command_prefix",
                &mut backfilled,
            ),
        };
        let relay = RelaySettings {
            server_to_group: take(
                self.plugin.server_to_group,
                &defaults.relay.server_to_group,
                "server_to_group",
                &mut backfilled,
            ),
            group_to_server: take(
                self.plugin.group_to_server,
                &defaults.relay.group_to_server,
                "group_to_server",
                &mut backfilled,
            ),
        };
        let groups = take(
            self.groups.groups,
            &defaults.groups,
            "groups",
            &mut backfilled,
        );
        let servers = take(
            self.servers.servers,
            &defaults.servers,
            "servers",
            &mut backfilled,
        );
        let banned_words = BannedWordSettings {
            words: take(
                self.banned_words.words,
                &defaults.banned_words.words,
                "banned_words",
                &mut backfilled,
            ),
            replacement: take(
                self.banned_words.replacement,
                &defaults.banned_words.replacement,
                "banned_word_replacement",
                &mut backfilled,
            ),
        };
        // Player data has no factory content; an absent shard is simply empty.
        let players = self.players.players.unwrap_or_default();

        let snapshot = ConfigSnapshot {
            ingress,
            relay,
            servers,
            groups,
            banned_words,
            players,
        };
        (snapshot, backfilled)
    }
}

impl From<SampleDocument> for ShardSet {
    fn from(sample: SampleDocument) -> Self {
        Self {
            plugin: sample.plugin,
            groups: sample.groups,
            servers: sample.servers,
            banned_words: sample.banned_words,
            players: sample.players,
        }
    }
}
