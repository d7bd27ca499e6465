use std::{sync::Arc, time::Duration};

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    services::{
        banned_words::BannedWordFilter,
        chat_sink::ChatSink,
        config_store::ConfigStore,
        identity::{IdentityBook, IdentityIndex},
    },
    state::{
        event::{GameEvent, GameEventKind, IngressEvent},
        snapshot::{ConfigSnapshot, GroupConfig},
    },
};

/// Default pause before server up/down notices go out.
pub const DEFAULT_STATUS_DELAY: Duration = Duration::from_secs(2);

/// One rendered line destined for one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Target group.
    pub group_id: String,
    /// Rendered line.
    pub text: String,
    /// How long to wait before sending.
    pub delay: Duration,
}

/// Counts from one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Lines accepted by the sink.
    pub delivered: usize,
    /// Lines the sink rejected.
    pub failed: usize,
    /// Deliveries handed to a timer; their outcome is only logged.
    pub scheduled: usize,
}

/// Decide which groups receive `event` and how it reads in each of them.
///
/// Pure: the result depends only on the arguments.
pub fn route(
    event: &IngressEvent,
    snapshot: &ConfigSnapshot,
    book: &IdentityBook,
    status_delay: Duration,
) -> Vec<Delivery> {
    let category = event.category();
    let server = event.server();

    snapshot
        .groups
        .iter()
        .filter(|group| !group.is_default())
        .filter(|group| group.subscribes(category, server))
        .filter_map(|group| {
            let (text, delay) = match event {
                IngressEvent::ServerUp { server } => {
                    (format!("[{server}] server is online"), status_delay)
                }
                IngressEvent::ServerDown { server } => {
                    (format!("[{server}] server is offline"), status_delay)
                }
                IngressEvent::Game(game) => {
                    (render_game_event(game, group, snapshot, book)?, Duration::ZERO)
                }
            };
            Some(Delivery {
                group_id: group.id.clone(),
                text,
                delay,
            })
        })
        .collect()
}

fn render_game_event(
    event: &GameEvent,
    group: &GroupConfig,
    snapshot: &ConfigSnapshot,
    book: &IdentityBook,
) -> Option<String> {
    let server = &event.server;
    let player = &event.player.nickname;
    let text = match &event.kind {
        GameEventKind::Join => format!("[{server}] {player} joined the game"),
        GameEventKind::Quit => format!("[{server}] {player} left the game"),
        GameEventKind::Death { message } => match message {
            Some(message) => format!("[{server}] {message}"),
            None => format!("[{server}] {player} died"),
        },
        GameEventKind::Achievement { title } => {
            format!("[{server}] {player} has made the advancement [{title}]")
        }
        GameEventKind::PlayerCommand { command } => {
            format!("[{server}] {player} ran command /{command}")
        }
        GameEventKind::Chat { message } => {
            // Groups with a prefix only take lines addressed to them.
            let message = match group.prefix.as_str() {
                "" => message.as_str(),
                prefix => message.strip_prefix(prefix)?,
            };
            let display = book
                .resolve_group_nick(player, Some(&group.id), Some(server.as_str()))
                .unwrap_or(player);
            format!(
                "[{server}] {display} {separator} {message}",
                separator = snapshot.relay.server_to_group
            )
        }
    };
    Some(text)
}

/// Send `deliveries`, each independently of the others.
pub async fn deliver(deliveries: Vec<Delivery>, sink: &Arc<dyn ChatSink>) -> FanOutReport {
    let mut report = FanOutReport::default();
    for delivery in deliveries {
        if delivery.delay.is_zero() {
            match sink
                .send_group_message(&delivery.group_id, delivery.text)
                .await
            {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    warn!(group = %delivery.group_id, error = %err, "group delivery failed");
                    report.failed += 1;
                }
            }
            continue;
        }

        report.scheduled += 1;
        let sink = sink.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delivery.delay).await;
            if let Err(err) = sink
                .send_group_message(&delivery.group_id, delivery.text)
                .await
            {
                warn!(group = %delivery.group_id, error = %err, "delayed group delivery failed");
            }
        });
    }
    report
}

/// Consumes ingress events: records joins, masks chat and fans events out to groups.
pub struct Notifier {
    config: Arc<ConfigStore>,
    identity: Arc<IdentityIndex>,
    banned_words: Arc<BannedWordFilter>,
    sink: Arc<dyn ChatSink>,
    status_delay: Duration,
}

impl Notifier {
    /// Build a dispatcher over the shared configuration, identity and sink.
    pub fn new(
        config: Arc<ConfigStore>,
        identity: Arc<IdentityIndex>,
        banned_words: Arc<BannedWordFilter>,
        sink: Arc<dyn ChatSink>,
        status_delay: Duration,
    ) -> Self {
        Self {
            config,
            identity,
            banned_words,
            sink,
            status_delay,
        }
    }

    /// Process one event. Failures are logged; nothing propagates.
    pub async fn handle(&self, event: IngressEvent) -> FanOutReport {
        let event = match event {
            IngressEvent::Game(mut game) => {
                if game.kind == GameEventKind::Join {
                    if let Err(err) = self.identity.on_join(&game).await {
                        warn!(server = %game.server, error = %err, "failed to record join");
                    }
                }
                if let GameEventKind::Chat { message } = &mut game.kind {
                    *message = self.banned_words.filter(message);
                }
                IngressEvent::Game(game)
            }
            status => status,
        };

        let snapshot = self.config.current();
        let book = self.identity.book();
        let deliveries = route(&event, &snapshot, &book, self.status_delay);
        if deliveries.is_empty() {
            debug!(server = %event.server(), category = ?event.category(), "event not routed to any group");
            return FanOutReport::default();
        }
        deliver(deliveries, &self.sink).await
    }

    /// Drain `events` in arrival order until every sender is gone.
    pub fn spawn(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<IngressEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                self.handle(event).await;
            }
            info!("event dispatcher stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::file_store::MemoryFileStore,
        services::{chat_sink::testing::RecordingSink, persistence::WriteBehindCache},
        state::{
            event::{EventCategory, PlayerInfo},
            snapshot::{DEFAULT_GROUP, ServerDescriptor},
        },
    };
    use proptest::prelude::*;

    fn chat(server: &str, name: &str, message: &str) -> IngressEvent {
        IngressEvent::Game(GameEvent {
            server: server.into(),
            player: PlayerInfo {
                nickname: name.into(),
                uuid: Some("u-1".into()),
                is_op: false,
            },
            kind: GameEventKind::Chat {
                message: message.into(),
            },
        })
    }

    fn group(id: &str) -> GroupConfig {
        GroupConfig {
            id: id.into(),
            name: format!("group {id}"),
            ..GroupConfig::default()
        }
    }

    fn alpha_beta() -> ConfigSnapshot {
        let mut snapshot = ConfigSnapshot::sample();
        for (name, prefix) in [("Alpha", "a"), ("Beta", "b")] {
            snapshot.servers.push(ServerDescriptor {
                name: name.into(),
                prefix: prefix.into(),
                ..ServerDescriptor::default()
            });
        }
        let mut chat_group = group("500");
        chat_group.chat = vec!["Alpha".into()];
        snapshot.groups.push(chat_group);
        snapshot
    }

    #[test]
    fn chat_reaches_only_subscribed_groups() {
        let snapshot = alpha_beta();
        let book = IdentityBook::default();

        assert!(route(&chat("Beta", "Steve", "hi"), &snapshot, &book, DEFAULT_STATUS_DELAY).is_empty());

        let deliveries = route(&chat("Alpha", "Steve", "hi"), &snapshot, &book, DEFAULT_STATUS_DELAY);
        assert_eq!(
            deliveries,
            vec![Delivery {
                group_id: "500".into(),
                text: "[Alpha] Steve says hi".into(),
                delay: Duration::ZERO,
            }]
        );
    }

    #[tokio::test]
    async fn chat_uses_group_specific_bound_name() {
        let files = MemoryFileStore::new();
        let config = Arc::new(ConfigStore::new(Arc::new(WriteBehindCache::new(
            Arc::new(files),
            50,
        ))));
        let identity = IdentityIndex::new(config.clone());
        let join = GameEvent {
            server: "Alpha".into(),
            player: PlayerInfo {
                nickname: "Alice".into(),
                uuid: Some("u-1".into()),
                is_op: false,
            },
            kind: GameEventKind::Join,
        };
        identity.on_join(&join).await.unwrap();
        identity.bind("Alice", "1001", "500", "小明").await.unwrap();
        identity.bind("Alice", "1001", "600", "小红").await.unwrap();

        let mut snapshot = alpha_beta();
        let mut other = group("600");
        other.chat = vec!["Alpha".into()];
        snapshot.groups.push(other);

        let deliveries = route(
            &chat("Alpha", "Alice", "hi"),
            &snapshot,
            &identity.book(),
            DEFAULT_STATUS_DELAY,
        );
        let texts: Vec<_> = deliveries.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(texts, ["[Alpha] 小明 says hi", "[Alpha] 小红 says hi"]);
    }

    #[test]
    fn group_prefix_gates_and_is_stripped() {
        let mut snapshot = alpha_beta();
        snapshot.groups[1].prefix = "#".into();
        let book = IdentityBook::default();

        assert!(route(&chat("Alpha", "Steve", "hi"), &snapshot, &book, Duration::ZERO).is_empty());
        let deliveries = route(&chat("Alpha", "Steve", "#hi"), &snapshot, &book, Duration::ZERO);
        assert_eq!(deliveries[0].text, "[Alpha] Steve says hi");
    }

    #[test]
    fn status_events_are_delayed_and_skip_default_group() {
        let mut snapshot = alpha_beta();
        snapshot.groups[1].server_status = vec!["Alpha".into()];
        assert!(snapshot.group(DEFAULT_GROUP).unwrap().sync_all);

        let up = IngressEvent::ServerUp {
            server: "Alpha".into(),
        };
        let deliveries = route(&up, &snapshot, &IdentityBook::default(), DEFAULT_STATUS_DELAY);
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].group_id, "500");
        assert_eq!(deliveries[0].text, "[Alpha] server is online");
        assert_eq!(deliveries[0].delay, DEFAULT_STATUS_DELAY);
    }

    fn any_event() -> impl Strategy<Value = IngressEvent> {
        let kinds = prop_oneof![
            Just(GameEventKind::Join),
            Just(GameEventKind::Quit),
            Just(GameEventKind::Death { message: None }),
            Just(GameEventKind::Chat { message: "hi".into() }),
            Just(GameEventKind::Achievement { title: "Stone Age".into() }),
            Just(GameEventKind::PlayerCommand { command: "list".into() }),
        ];
        (prop_oneof![Just("Alpha"), Just("Beta")], kinds, any::<bool>()).prop_map(
            |(server, kind, status)| {
                if status {
                    IngressEvent::ServerDown {
                        server: server.into(),
                    }
                } else {
                    IngressEvent::Game(GameEvent {
                        server: server.into(),
                        player: PlayerInfo {
                            nickname: "Steve".into(),
                            uuid: None,
                            is_op: false,
                        },
                        kind,
                    })
                }
            },
        )
    }

    proptest! {
        #[test]
        fn empty_lists_never_deliver(event in any_event()) {
            let mut snapshot = alpha_beta();
            snapshot.groups[1] = group("500");
            let deliveries = route(&event, &snapshot, &IdentityBook::default(), Duration::ZERO);
            prop_assert!(deliveries.is_empty());
        }

        #[test]
        fn sync_all_always_delivers(event in any_event()) {
            let mut snapshot = alpha_beta();
            snapshot.groups[1] = GroupConfig { sync_all: true, ..group("500") };
            let deliveries = route(&event, &snapshot, &IdentityBook::default(), Duration::ZERO);
            prop_assert_eq!(deliveries.len(), 1);
        }
    }

    #[tokio::test]
    async fn one_unreachable_group_does_not_stop_the_rest() {
        let sink: Arc<dyn ChatSink> = Arc::new(RecordingSink {
            unreachable: vec!["500".into()],
            ..RecordingSink::default()
        });
        let deliveries = vec![
            Delivery {
                group_id: "500".into(),
                text: "a".into(),
                delay: Duration::ZERO,
            },
            Delivery {
                group_id: "600".into(),
                text: "b".into(),
                delay: Duration::ZERO,
            },
        ];
        let report = deliver(deliveries, &sink).await;
        assert_eq!((report.delivered, report.failed), (1, 1));
    }

    #[tokio::test]
    async fn handler_records_joins_and_masks_chat() {
        let files = MemoryFileStore::new();
        let config = Arc::new(ConfigStore::new(Arc::new(WriteBehindCache::new(
            Arc::new(files),
            50,
        ))));
        let mut snapshot = alpha_beta();
        snapshot.groups[1].join = vec!["Alpha".into()];
        config.install(Arc::new(snapshot));
        let identity = Arc::new(IdentityIndex::new(config.clone()));
        let banned = Arc::new(BannedWordFilter::new(config.current().banned_words.clone()));
        let sink = Arc::new(RecordingSink::default());
        let notifier = Notifier::new(
            config,
            identity.clone(),
            banned,
            sink.clone(),
            Duration::ZERO,
        );

        let join = IngressEvent::Game(GameEvent {
            server: "Alpha".into(),
            player: PlayerInfo {
                nickname: "Alice".into(),
                uuid: Some("u-1".into()),
                is_op: true,
            },
            kind: GameEventKind::Join,
        });
        assert_eq!(join.category(), EventCategory::Join);
        notifier.handle(join).await;
        notifier.handle(chat("Alpha", "Alice", "a badword")).await;

        assert!(identity.is_operator("Alice", Some("Alpha")));
        assert_eq!(
            sink.delivered(),
            vec![
                ("500".to_string(), "[Alpha] Alice joined the game".to_string()),
                ("500".to_string(), "[Alpha] Alice says a ***".to_string()),
            ]
        );
    }
}
