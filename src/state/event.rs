use serde::Serialize;

/// Subscription category an event is routed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// A server session opened or closed.
    ServerStatus,
    /// Player joined.
    Join,
    /// Player left.
    Leave,
    /// Player died.
    Death,
    /// Player made an advancement.
    Achievement,
    /// In-game chat.
    Chat,
    /// Player ran a command.
    Command,
}

/// Player fields carried by game events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerInfo {
    /// In-game name.
    pub nickname: String,
    /// Unique player id, absent on some event types.
    pub uuid: Option<String>,
    /// Operator flag reported by the server.
    pub is_op: bool,
}

/// What happened in the game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEventKind {
    /// Player joined the server.
    Join,
    /// Player left the server.
    Quit,
    /// Player died.
    Death {
        /// Death message, when the server sent one.
        message: Option<String>,
    },
    /// Player chatted.
    Chat {
        /// Chat text.
        message: String,
    },
    /// Player made an advancement.
    Achievement {
        /// Advancement title.
        title: String,
    },
    /// Player ran a command.
    PlayerCommand {
        /// Command without the leading slash.
        command: String,
    },
}

/// Parsed event reported by one game server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameEvent {
    /// Normalized name of the reporting server.
    pub server: String,
    /// Player the event is about.
    pub player: PlayerInfo,
    /// What happened.
    pub kind: GameEventKind,
}

impl GameEvent {
    /// Subscription category of this event.
    pub fn category(&self) -> EventCategory {
        match self.kind {
            GameEventKind::Join => EventCategory::Join,
            GameEventKind::Quit => EventCategory::Leave,
            GameEventKind::Death { .. } => EventCategory::Death,
            GameEventKind::Chat { .. } => EventCategory::Chat,
            GameEventKind::Achievement { .. } => EventCategory::Achievement,
            GameEventKind::PlayerCommand { .. } => EventCategory::Command,
        }
    }
}

/// Everything the ingress side hands to the notification pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngressEvent {
    /// A game server opened its event session.
    ServerUp {
        /// Normalized server name.
        server: String,
    },
    /// A game server's session went away.
    ServerDown {
        /// Normalized server name.
        server: String,
    },
    /// A parsed in-game event.
    Game(GameEvent),
}

impl IngressEvent {
    /// Name of the server the event came from.
    pub fn server(&self) -> &str {
        match self {
            IngressEvent::ServerUp { server } | IngressEvent::ServerDown { server } => server,
            IngressEvent::Game(event) => &event.server,
        }
    }

    /// Subscription category of this event.
    pub fn category(&self) -> EventCategory {
        match self {
            IngressEvent::ServerUp { .. } | IngressEvent::ServerDown { .. } => {
                EventCategory::ServerStatus
            }
            IngressEvent::Game(event) => event.category(),
        }
    }
}
