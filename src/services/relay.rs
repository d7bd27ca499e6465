use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::{
    services::{
        banned_words::BannedWordFilter,
        config_store::ConfigStore,
        console_pool::{CommandOutcome, ConnectionPool, ConsoleError},
        identity::{IdentityBook, IdentityIndex},
    },
    state::{event::EventCategory, snapshot::ConfigSnapshot},
};

/// A console command issued from a chat group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    /// Target server; when absent it is taken from the line's prefix.
    pub server: Option<String>,
    /// Command text, or the full prefixed chat line when `server` is absent.
    pub command: String,
    /// Group the command was sent from, used to resolve `@nick` mentions.
    pub group_id: Option<String>,
    /// Chat account of the sender.
    pub account: String,
    /// Bot owner or equivalent; bypasses every permission check.
    pub privileged: bool,
}

/// Why a command was not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandRejection {
    /// No server matched the request.
    UnknownServer,
    /// The server has an empty allow-list.
    NotEnabled,
    /// The command is not on the allow-list.
    Forbidden,
    /// Delivery to the console failed.
    Unreachable,
}

/// Result of a chat command, carrying the line to show in the group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    /// Server the command was routed to, if one was resolved.
    pub server: Option<String>,
    /// Command as sent, after mention translation.
    pub command: String,
    /// Set when the command did not run.
    pub rejection: Option<CommandRejection>,
    /// Console output, or a short failure line.
    pub text: String,
}

impl CommandReply {
    /// Whether the console ran the command.
    pub fn executed(&self) -> bool {
        self.rejection.is_none()
    }

    fn rejected(
        server: Option<String>,
        command: String,
        rejection: CommandRejection,
        text: impl Into<String>,
    ) -> Self {
        Self {
            server,
            command,
            rejection: Some(rejection),
            text: text.into(),
        }
    }
}

/// A chat line to be shown on game servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMessageRequest {
    /// Group the line was posted in.
    pub group_id: String,
    /// Chat account of the sender.
    pub account: String,
    /// Sender's chat nickname, used when the account is not bound.
    pub sender_name: String,
    /// Line text, including any server prefix.
    pub message: String,
}

/// Group → server direction of the bridge.
pub struct ChatRelay {
    config: Arc<ConfigStore>,
    pool: Arc<ConnectionPool>,
    identity: Arc<IdentityIndex>,
    banned_words: Arc<BannedWordFilter>,
}

impl ChatRelay {
    /// Build the relay over the shared configuration, console pool and identity index.
    pub fn new(
        config: Arc<ConfigStore>,
        pool: Arc<ConnectionPool>,
        identity: Arc<IdentityIndex>,
        banned_words: Arc<BannedWordFilter>,
    ) -> Self {
        Self {
            config,
            pool,
            identity,
            banned_words,
        }
    }

    /// Run a console command on behalf of a chat member.
    ///
    /// Privileged callers and operators bound to the sender's account skip the
    /// allow-list. Failures come back as a reply, never as an error.
    pub async fn run_command(&self, request: CommandRequest) -> CommandReply {
        let snapshot = self.config.current();
        let Some((server, command)) = resolve_target(&snapshot, &request) else {
            return CommandReply::rejected(
                None,
                request.command,
                CommandRejection::UnknownServer,
                "no server matches that command",
            );
        };

        let book = self.identity.book();
        let command = translate_mentions(&command, &book, request.group_id.as_deref());

        let Some(entry) = self.pool.get(&server) else {
            return CommandReply::rejected(
                Some(server.clone()),
                command,
                CommandRejection::UnknownServer,
                format!("server {server} has no remote console configured"),
            );
        };

        let sender = book.resolve_by_account(&request.account, Some(&server));
        let operator = sender.is_some_and(|name| book.is_operator(name, Some(&server)));
        if !request.privileged && !operator {
            let descriptor = entry.descriptor().await;
            if descriptor.allowed_commands.is_empty() {
                warn!(server = %server, account = %request.account, "member commands are disabled");
                return CommandReply::rejected(
                    Some(server.clone()),
                    command,
                    CommandRejection::NotEnabled,
                    format!("member commands are not enabled on {server}"),
                );
            }
            if !descriptor.permits(&command) {
                warn!(server = %server, account = %request.account, command = %command, "command not allowed");
                return CommandReply::rejected(
                    Some(server),
                    command,
                    CommandRejection::Forbidden,
                    "you do not have permission to run this command",
                );
            }
        }

        info!(
            server = %server,
            account = %request.account,
            privileged = request.privileged,
            operator,
            command = %command,
            "running chat command"
        );
        match self.pool.send_command(&entry, &command, true).await {
            Ok(CommandOutcome::Response(text)) => CommandReply {
                server: Some(server),
                command,
                rejection: None,
                text: if text.trim().is_empty() {
                    "(no output)".into()
                } else {
                    text
                },
            },
            Ok(CommandOutcome::Sent) => CommandReply {
                server: Some(server),
                command,
                rejection: None,
                text: String::new(),
            },
            Err(err) => {
                warn!(server = %server, error = %err, "chat command failed");
                let text = failure_line(&server, &err);
                CommandReply::rejected(Some(server), command, CommandRejection::Unreachable, text)
            }
        }
    }

    /// Relay a group chat line to every server it addresses.
    ///
    /// Returns the servers the line was sent to.
    pub async fn forward_group_message(&self, request: GroupMessageRequest) -> Vec<String> {
        let snapshot = self.config.current();
        let Some(group) = snapshot.group_or_default(&request.group_id) else {
            return Vec::new();
        };
        if !group.sync_all && group.chat.is_empty() {
            info!(group = %request.group_id, "group chat relay not enabled");
            return Vec::new();
        }

        let display = self
            .identity
            .resolve_by_account(&request.account, None)
            .unwrap_or_else(|| request.sender_name.clone());
        let separator = &snapshot.relay.group_to_server;
        let speaker = if group.show_group_name {
            format!("<{display}> [in {}] {separator}", group.name)
        } else {
            format!("<{display}> {separator}")
        };

        let mut forwarded = Vec::new();
        for server in snapshot.servers.iter().filter(|server| server.is_complete()) {
            if server.prefix.is_empty() {
                continue;
            }
            let Some(content) = request.message.strip_prefix(&server.prefix) else {
                continue;
            };
            if !group.subscribes(EventCategory::Chat, &server.name) {
                continue;
            }
            let Some(entry) = self.pool.get(&server.name) else {
                continue;
            };

            let text = self.banned_words.filter(content.trim());
            let payload = json!({ "text": format!("{speaker} {text}"), "color": "white" });
            let command = format!("tellraw @a {payload}");
            match self.pool.send_command(&entry, &command, false).await {
                Ok(_) => forwarded.push(server.name.clone()),
                Err(err) => {
                    warn!(server = %server.name, error = %err, "failed to relay group chat");
                }
            }
        }
        forwarded
    }
}

/// Pick the target server and command text.
///
/// Without an explicit server the line must start with a server prefix followed
/// by the command prefix.
fn resolve_target(snapshot: &ConfigSnapshot, request: &CommandRequest) -> Option<(String, String)> {
    if let Some(server) = request.server.as_deref() {
        snapshot.server(server)?;
        return Some((server.to_string(), request.command.trim().to_string()));
    }

    let command_prefix = &snapshot.ingress.command_prefix;
    snapshot
        .servers
        .iter()
        .filter(|server| !server.is_reserved() && !server.prefix.is_empty())
        .find_map(|server| {
            let marker = format!("{}{}", server.prefix, command_prefix);
            request
                .command
                .strip_prefix(&marker)
                .map(|command| (server.name.clone(), command.trim().to_string()))
        })
}

/// Replace `@nick` mentions with the in-game names they are bound to in `group_id`.
pub fn translate_mentions(text: &str, book: &IdentityBook, group_id: Option<&str>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(at) = rest.find('@') {
        out.push_str(&rest[..at]);
        let after = &rest[at + 1..];
        let end = after
            .find(|c: char| c.is_whitespace() || c == '@')
            .unwrap_or(after.len());
        let nick = &after[..end];
        match (!nick.is_empty())
            .then(|| book.resolve_by_group_nick(nick, group_id))
            .flatten()
        {
            Some(name) => out.push_str(name),
            None => {
                out.push('@');
                out.push_str(nick);
            }
        }
        rest = &after[end..];
    }
    out.push_str(rest);
    out
}

fn failure_line(server: &str, err: &ConsoleError) -> String {
    match err {
        ConsoleError::NotConfigured { .. } => {
            format!("server {server} has no remote console configured")
        }
        ConsoleError::AlreadyConnecting { .. } => {
            format!("still connecting to {server}, try again shortly")
        }
        ConsoleError::ConnectFailed { .. } | ConsoleError::ConnectTimeout { .. } => {
            format!("could not connect to {server}")
        }
        ConsoleError::SendFailed { .. } => format!("failed to send the command to {server}"),
        ConsoleError::ResponseTimeout { .. } => format!("{server} did not answer in time"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        dao::{
            file_store::MemoryFileStore,
            rcon::testing::{MockConsole, MockReply},
        },
        services::persistence::WriteBehindCache,
        state::{
            event::{GameEvent, GameEventKind, PlayerInfo},
            snapshot::{GroupConfig, ServerDescriptor},
        },
    };

    struct Harness {
        console: MockConsole,
        identity: Arc<IdentityIndex>,
        relay: ChatRelay,
    }

    async fn harness(allowed: &[&str]) -> Harness {
        let console = MockConsole::start("pw", MockReply::Echo).await;
        let config = Arc::new(ConfigStore::new(Arc::new(WriteBehindCache::new(
            Arc::new(MemoryFileStore::new()),
            50,
        ))));
        let mut snapshot = ConfigSnapshot::sample();
        snapshot.servers.push(ServerDescriptor {
            name: "alpha".into(),
            prefix: "a".into(),
            host: "127.0.0.1".into(),
            port: Some(console.port()),
            secret: "pw".into(),
            allowed_commands: allowed.iter().map(|c| c.to_string()).collect(),
        });
        snapshot.groups.push(GroupConfig {
            id: "500".into(),
            name: "Lobby".into(),
            show_group_name: true,
            chat: vec!["alpha".into()],
            ..GroupConfig::default()
        });
        config.install(Arc::new(snapshot));

        let pool = Arc::new(ConnectionPool::new(config.subscribe(), Duration::from_secs(2)));
        let identity = Arc::new(IdentityIndex::new(config.clone()));
        let banned = Arc::new(BannedWordFilter::new(config.current().banned_words.clone()));
        let relay = ChatRelay::new(config, pool, identity.clone(), banned);
        Harness {
            console,
            identity,
            relay,
        }
    }

    async fn join(identity: &IdentityIndex, name: &str, is_op: bool) {
        identity
            .on_join(&GameEvent {
                server: "alpha".into(),
                player: PlayerInfo {
                    nickname: name.into(),
                    uuid: Some(format!("uuid-{name}")),
                    is_op,
                },
                kind: GameEventKind::Join,
            })
            .await
            .unwrap();
    }

    fn command(line: &str, account: &str, privileged: bool) -> CommandRequest {
        CommandRequest {
            server: None,
            command: line.into(),
            group_id: Some("500".into()),
            account: account.into(),
            privileged,
        }
    }

    #[tokio::test]
    async fn allow_list_gates_ordinary_members() {
        let harness = harness(&["list"]).await;

        let reply = harness.relay.run_command(command("a/list", "1001", false)).await;
        assert!(reply.executed());
        assert_eq!(reply.text, "echo: list");

        let reply = harness.relay.run_command(command("a/stop", "1001", false)).await;
        assert_eq!(reply.rejection, Some(CommandRejection::Forbidden));
        assert_eq!(harness.console.received().await, ["list"]);
    }

    #[tokio::test]
    async fn privileged_and_operators_bypass_allow_list() {
        let harness = harness(&[]).await;

        let reply = harness.relay.run_command(command("a/stop", "1001", false)).await;
        assert_eq!(reply.rejection, Some(CommandRejection::NotEnabled));
        assert!(reply.text.contains("not enabled"));

        let reply = harness.relay.run_command(command("a/stop", "1", true)).await;
        assert_eq!(reply.text, "echo: stop");

        join(&harness.identity, "Alice", true).await;
        harness.identity.bind("Alice", "1001", "500", "小明").await.unwrap();
        let reply = harness.relay.run_command(command("a/save-all", "1001", false)).await;
        assert_eq!(reply.text, "echo: save-all");
    }

    #[tokio::test]
    async fn mentions_are_translated_per_group() {
        let harness = harness(&["tell"]).await;
        join(&harness.identity, "Alice", false).await;
        harness.identity.bind("Alice", "1001", "500", "小明").await.unwrap();

        let reply = harness
            .relay
            .run_command(command("a/tell @小明 hi @nobody", "2002", false))
            .await;
        assert_eq!(reply.command, "tell Alice hi @nobody");

        let other_group = translate_mentions("@小明", &harness.identity.book(), Some("600"));
        assert_eq!(other_group, "@小明");
    }

    #[tokio::test]
    async fn unknown_server_is_rejected() {
        let harness = harness(&["list"]).await;
        let reply = harness.relay.run_command(command("z/list", "1", true)).await;
        assert_eq!(reply.rejection, Some(CommandRejection::UnknownServer));

        let explicit = CommandRequest {
            server: Some("default_server".into()),
            ..command("list", "1", true)
        };
        let reply = harness.relay.run_command(explicit).await;
        assert_eq!(reply.rejection, Some(CommandRejection::UnknownServer));
    }

    #[tokio::test]
    async fn group_chat_becomes_filtered_tellraw() {
        let harness = harness(&["list"]).await;
        let forwarded = harness
            .relay
            .forward_group_message(GroupMessageRequest {
                group_id: "500".into(),
                account: "1001".into(),
                sender_name: "Steve".into(),
                message: "a hello badword".into(),
            })
            .await;
        assert_eq!(forwarded, ["alpha"]);

        let mut received = Vec::new();
        for _ in 0..50 {
            received = harness.console.received().await;
            if !received.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let payload = received[0].strip_prefix("tellraw @a ").unwrap();
        let payload: serde_json::Value = serde_json::from_str(payload).unwrap();
        assert_eq!(payload["text"], "<Steve> [in Lobby] says hello ***");
        assert_eq!(payload["color"], "white");
    }

    #[tokio::test]
    async fn unprefixed_or_unsubscribed_chat_is_not_forwarded() {
        let harness = harness(&["list"]).await;
        let request = GroupMessageRequest {
            group_id: "500".into(),
            account: "1001".into(),
            sender_name: "Steve".into(),
            message: "hello".into(),
        };
        assert!(harness.relay.forward_group_message(request.clone()).await.is_empty());

        let other = GroupMessageRequest {
            group_id: "999".into(),
            message: "a hello".into(),
            ..request
        };
        // Unknown groups fall back to the default entry, which syncs everything.
        assert_eq!(harness.relay.forward_group_message(other).await, ["alpha"]);
    }
}
