use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::state::event::EventCategory;

/// Reserved name of the placeholder server entry shipped in the sample.
pub const DEFAULT_SERVER: &str = "default_server";
/// Reserved id of the fallback group configuration.
pub const DEFAULT_GROUP: &str = "default_group";

/// Player records keyed by the server they were seen on.
pub type PlayerTable = IndexMap<String, Vec<PlayerRecord>>;

/// Settings of the inbound event socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressSettings {
    /// HTTP path the WebSocket upgrade is served on.
    pub path: String,
    /// TCP port the ingress listener binds.
    pub port: u16,
    /// Prefix that marks a chat line as a console command.
    pub command_prefix: String,
}

/// Separator words used when relaying chat in either direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaySettings {
    /// Inserted between the speaker and the text on server → group lines.
    pub server_to_group: String,
    /// Inserted between the speaker and the text on group → server lines.
    pub group_to_server: String,
}

/// Everything needed to reach one game server's remote console.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerDescriptor {
    /// Unique server name, matched against the ingress identity header.
    pub name: String,
    /// Chat prefix addressing this server from a group.
    pub prefix: String,
    /// Remote-console host.
    pub host: String,
    /// Remote-console port.
    pub port: Option<u16>,
    /// Remote-console password.
    pub secret: String,
    /// Command prefixes ordinary members may run.
    pub allowed_commands: Vec<String>,
}

impl ServerDescriptor {
    /// Whether this is the placeholder entry from the sample file.
    pub fn is_reserved(&self) -> bool {
        self.name == DEFAULT_SERVER
    }

    /// Whether the descriptor carries enough to open a console connection.
    pub fn is_complete(&self) -> bool {
        !self.is_reserved()
            && !self.name.is_empty()
            && !self.host.is_empty()
            && self.port.is_some()
            && !self.secret.is_empty()
    }

    /// Compare every field that affects a live console connection or its permissions.
    pub fn same_link_settings(&self, other: &ServerDescriptor) -> bool {
        self.host == other.host
            && self.port == other.port
            && self.secret == other.secret
            && self.prefix == other.prefix
            && self.allowed_commands == other.allowed_commands
    }

    /// Case-insensitive prefix match of `command` against the allow-list.
    ///
    /// An empty allow-list denies everything.
    pub fn permits(&self, command: &str) -> bool {
        let command = command.trim().to_lowercase();
        self.allowed_commands
            .iter()
            .any(|allowed| command.starts_with(&allowed.trim().to_lowercase()))
    }
}

/// Per-group routing rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    /// Chat group id, or [`DEFAULT_GROUP`].
    #[serde(deserialize_with = "deserialize_group_id")]
    pub id: String,
    /// Human readable group name shown in relayed lines.
    pub name: String,
    /// Prefix a chat line must carry to be relayed into this group.
    pub prefix: String,
    /// Show the group name on lines relayed to the game.
    pub show_group_name: bool,
    /// Receive every event regardless of the per-category lists.
    pub sync_all: bool,
    /// Servers whose up/down notices reach this group.
    pub server_status: Vec<String>,
    /// Servers whose join events reach this group.
    pub join: Vec<String>,
    /// Servers whose leave events reach this group.
    pub leave: Vec<String>,
    /// Servers whose death events reach this group.
    pub death: Vec<String>,
    /// Servers whose achievement events reach this group.
    pub achievement: Vec<String>,
    /// Servers whose chat reaches this group, and that receive its chat.
    pub chat: Vec<String>,
    /// Servers whose player commands reach this group.
    pub command: Vec<String>,
}

impl GroupConfig {
    /// Whether this is the fallback entry rather than a real group.
    pub fn is_default(&self) -> bool {
        self.id == DEFAULT_GROUP
    }

    /// Allow-list for one event category.
    pub fn subscriptions(&self, category: EventCategory) -> &[String] {
        match category {
            EventCategory::ServerStatus => &self.server_status,
            EventCategory::Join => &self.join,
            EventCategory::Leave => &self.leave,
            EventCategory::Death => &self.death,
            EventCategory::Achievement => &self.achievement,
            EventCategory::Chat => &self.chat,
            EventCategory::Command => &self.command,
        }
    }

    /// Delivery rule shared by both relay directions.
    pub fn subscribes(&self, category: EventCategory, server: &str) -> bool {
        self.sync_all
            || self
                .subscriptions(category)
                .iter()
                .any(|name| name == server)
    }
}

/// Banned words and their replacement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BannedWordSettings {
    /// Words masked in relayed text.
    pub words: Vec<String>,
    /// Text substituted for each banned word.
    pub replacement: String,
}

/// Display name a player uses inside one chat group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupBinding {
    /// Group the display name applies to.
    pub group_id: String,
    /// Nickname shown in that group.
    pub display_name: String,
}

/// Chat account linked to a player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBinding {
    /// Chat network account id.
    pub account: String,
    /// Per-group display names of that account.
    #[serde(default)]
    pub groups: Vec<GroupBinding>,
}

/// Identity of one player on one server, anchored to the server-issued unique id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    /// Server-issued unique id.
    pub uuid: String,
    /// Current in-game name.
    pub name: String,
    /// Operator flag reported by the server.
    #[serde(default)]
    pub operator: bool,
    /// Linked chat accounts.
    #[serde(default)]
    pub accounts: Vec<AccountBinding>,
    /// RFC 3339 timestamp of the last change.
    #[serde(default)]
    pub updated_at: String,
}

/// Reason a snapshot is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigViolation {
    /// Ingress port is zero.
    #[error("ingress port must be between 1 and 65535")]
    InvalidPort,
    /// Ingress path is not absolute.
    #[error("ingress path `{path}` must start with `/`")]
    InvalidPath {
        /// Configured path.
        path: String,
    },
    /// Command prefix is empty.
    #[error("command prefix must not be empty")]
    EmptyCommandPrefix,
    /// A server entry has an empty name.
    #[error("server entry {index} has no name")]
    EmptyServerName {
        /// Position in the server list.
        index: usize,
    },
    /// Two server entries share a name.
    #[error("server `{name}` is configured more than once")]
    DuplicateServer {
        /// Repeated name.
        name: String,
    },
    /// A console host is set without its port.
    #[error("server `{server}` sets a console host without a port")]
    MissingConsolePort {
        /// Server the entry belongs to.
        server: String,
    },
    /// Two groups share an id.
    #[error("group `{id}` is configured more than once")]
    DuplicateGroup {
        /// Repeated group id.
        id: String,
    },
    /// The default group has an empty name.
    #[error("default group must have a name")]
    DefaultGroupMissingName,
}

/// Small counters describing a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotSummary {
    /// Configured servers.
    pub servers: usize,
    /// Configured groups.
    pub groups: usize,
    /// Banned words.
    pub banned_words: usize,
}

/// The full configuration plus player data, replaced wholesale on reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSnapshot {
    /// Event listener settings.
    pub ingress: IngressSettings,
    /// Relay line separators.
    pub relay: RelaySettings,
    /// Game servers, in configuration order.
    pub servers: Vec<ServerDescriptor>,
    /// Chat groups, in configuration order.
    pub groups: Vec<GroupConfig>,
    /// Masked words and their replacement.
    pub banned_words: BannedWordSettings,
    /// Known players keyed by server name.
    pub players: PlayerTable,
}

impl ConfigSnapshot {
    /// Factory defaults written to the sample file and used for backfill.
    pub fn sample() -> Self {
        let everywhere = || vec!["server".to_string()];
        Self {
            ingress: IngressSettings {
                path: "/yz/v3/mcqq".into(),
                port: 1314,
                command_prefix: "/".into(),
            },
            relay: RelaySettings {
                server_to_group: "says".into(),
                group_to_server: "says".into(),
            },
            servers: vec![ServerDescriptor {
                name: DEFAULT_SERVER.into(),
                prefix: "a".into(),
                host: String::new(),
                port: None,
                secret: "password".into(),
                allowed_commands: vec!["list".into()],
            }],
            groups: vec![GroupConfig {
                id: DEFAULT_GROUP.into(),
                name: "Default".into(),
                prefix: "a".into(),
                show_group_name: true,
                sync_all: true,
                server_status: everywhere(),
                join: everywhere(),
                leave: everywhere(),
                death: everywhere(),
                achievement: everywhere(),
                chat: everywhere(),
                command: everywhere(),
            }],
            banned_words: BannedWordSettings {
                words: vec!["badword".into()],
                replacement: "***".into(),
            },
            players: PlayerTable::new(),
        }
    }

    /// Descriptor for `name`, if configured.
    pub fn server(&self, name: &str) -> Option<&ServerDescriptor> {
        self.servers.iter().find(|server| server.name == name)
    }

    /// Group configuration for `id`, if configured.
    pub fn group(&self, id: &str) -> Option<&GroupConfig> {
        self.groups.iter().find(|group| group.id == id)
    }

    /// Group configuration for `id`, falling back to the default entry.
    pub fn group_or_default(&self, id: &str) -> Option<&GroupConfig> {
        self.group(id).or_else(|| self.group(DEFAULT_GROUP))
    }

    /// Counters for status reporting.
    pub fn summary(&self) -> SnapshotSummary {
        SnapshotSummary {
            servers: self.servers.len(),
            groups: self.groups.len(),
            banned_words: self.banned_words.words.len(),
        }
    }

    /// Check structural rules, returning every violation found.
    pub fn validate(&self) -> Vec<ConfigViolation> {
        let mut violations = Vec::new();

        if self.ingress.port == 0 {
            violations.push(ConfigViolation::InvalidPort);
        }
        if !self.ingress.path.starts_with('/') {
            violations.push(ConfigViolation::InvalidPath {
                path: self.ingress.path.clone(),
            });
        }
        if self.ingress.command_prefix.is_empty() {
            violations.push(ConfigViolation::EmptyCommandPrefix);
        }

        let mut seen_servers = HashSet::new();
        for (index, server) in self.servers.iter().enumerate() {
            if server.name.is_empty() {
                violations.push(ConfigViolation::EmptyServerName { index });
                continue;
            }
            if !seen_servers.insert(server.name.as_str()) {
                violations.push(ConfigViolation::DuplicateServer {
                    name: server.name.clone(),
                });
            }
            if !server.host.is_empty() && server.port.is_none() {
                violations.push(ConfigViolation::MissingConsolePort {
                    server: server.name.clone(),
                });
            }
        }

        let mut seen_groups = HashSet::new();
        for group in &self.groups {
            if !seen_groups.insert(group.id.as_str()) {
                violations.push(ConfigViolation::DuplicateGroup {
                    id: group.id.clone(),
                });
            }
            if group.is_default() && group.name.is_empty() {
                violations.push(ConfigViolation::DefaultGroupMissingName);
            }
        }

        violations
    }
}

/// Accept a group id written as a string, a number, or a one-entry map.
///
/// Hand-edited YAML such as `id: {123456}` parses as a map whose only key is
/// the intended id.
fn deserialize_group_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_yaml::Value;

    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(id) => Ok(id),
        Value::Number(number) => Ok(number.to_string()),
        Value::Mapping(map) if map.len() == 1 => {
            let key = map
                .iter()
                .next()
                .map(|(key, _)| key.clone())
                .unwrap_or(Value::Null);
            let repaired = match key {
                Value::String(id) => id,
                Value::Number(number) => number.to_string(),
                other => return Err(D::Error::custom(format!("unusable group id {other:?}"))),
            };
            warn!(group = %repaired, "repaired group id written as a map");
            Ok(repaired)
        }
        Value::Null => Ok(String::new()),
        other => Err(D::Error::custom(format!("unusable group id {other:?}"))),
    }
}
