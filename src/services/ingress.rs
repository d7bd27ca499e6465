use std::{net::SocketAddr, sync::Arc, time::Duration, time::SystemTime};

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{
    net::TcpListener,
    sync::{Mutex, mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::{health::SessionSummary, ws::GameEventPayload},
    services::console_pool::ConnectionPool,
    state::{
        event::{GameEvent, GameEventKind, IngressEvent, PlayerInfo},
        snapshot::IngressSettings,
    },
};

/// Header carrying the game server's self-reported name.
pub const SERVER_NAME_HEADER: &str = "x-self-name";
/// Name used when the reported one normalizes to nothing.
pub const UNNAMED_SERVER: &str = "unnamed-server";

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Failures starting the ingress listener.
#[derive(Debug, Error)]
pub enum IngressError {
    /// `start` was called while a listener is up.
    #[error("ingress listener is already running on {addr}")]
    AlreadyRunning {
        /// Address of the running listener.
        addr: SocketAddr,
    },
    /// The port could not be bound.
    #[error("failed to bind ingress listener on port {port}")]
    Bind {
        /// Requested port.
        port: u16,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },
}

/// A frame that could not be turned into a [`GameEvent`].
#[derive(Debug, Error)]
pub enum EventParseError {
    /// The frame is not the expected JSON shape.
    #[error("malformed event payload")]
    Json(#[from] serde_json::Error),
    /// A binary frame held invalid UTF-8.
    #[error("frame is not valid UTF-8")]
    Encoding,
    /// The event type is not one the bridge understands.
    #[error("unknown event type `{0}`")]
    UnknownSubType(String),
}

/// One live ingress connection.
#[derive(Debug)]
pub struct Session {
    /// Unique id of this connection.
    pub id: Uuid,
    /// Normalized server name from the `x-self-name` header.
    pub name: String,
    /// When the connection was accepted.
    pub connected_at: SystemTime,
    tx: mpsc::UnboundedSender<Message>,
}

struct Listener {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Registry of ingress sessions, at most one per normalized server name.
pub struct SessionRegistry {
    sessions: DashMap<String, Session>,
    pool: Arc<ConnectionPool>,
    events: mpsc::UnboundedSender<IngressEvent>,
    listener: Mutex<Option<Listener>>,
}

impl SessionRegistry {
    /// Create a stopped registry that reports on `events`.
    pub fn new(pool: Arc<ConnectionPool>, events: mpsc::UnboundedSender<IngressEvent>) -> Self {
        Self {
            sessions: DashMap::new(),
            pool,
            events,
            listener: Mutex::new(None),
        }
    }

    /// Bind the WebSocket listener described by `settings`.
    pub async fn start(
        self: &Arc<Self>,
        settings: &IngressSettings,
    ) -> Result<SocketAddr, IngressError> {
        let mut slot = self.listener.lock().await;
        if let Some(listener) = slot.as_ref() {
            return Err(IngressError::AlreadyRunning {
                addr: listener.addr,
            });
        }

        let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], settings.port)))
            .await
            .map_err(|source| IngressError::Bind {
                port: settings.port,
                source,
            })?;
        let addr = listener.local_addr().map_err(|source| IngressError::Bind {
            port: settings.port,
            source,
        })?;

        let app = Router::new()
            .route(&settings.path, get(ingress_handler))
            .with_state(self.clone());
        let (shutdown, signal) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = signal.await;
            });
            if let Err(err) = server.await {
                warn!(error = %err, "ingress listener stopped with error");
            }
        });

        info!(%addr, path = %settings.path, "ingress listener started");
        *slot = Some(Listener {
            addr,
            shutdown,
            task,
        });
        Ok(addr)
    }

    /// Close every session and stop the listener. A stopped registry is a no-op.
    pub async fn stop(&self) {
        let names: Vec<String> = self
            .sessions
            .iter()
            .map(|session| session.key().clone())
            .collect();
        for name in names {
            self.close_session(&name).await;
        }

        let Some(listener) = self.listener.lock().await.take() else {
            return;
        };
        let _ = listener.shutdown.send(());
        let mut task = listener.task;
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
            warn!("ingress listener did not drain in time; aborting");
            task.abort();
        }
        info!(addr = %listener.addr, "ingress listener stopped");
    }

    /// Stop and start again with `settings`.
    pub async fn restart(
        self: &Arc<Self>,
        settings: &IngressSettings,
    ) -> Result<SocketAddr, IngressError> {
        self.stop().await;
        self.start(settings).await
    }

    /// Whether the listener is up.
    pub async fn is_running(&self) -> bool {
        self.listener.lock().await.is_some()
    }

    /// Address the listener is bound to, when running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.lock().await.as_ref().map(|listener| listener.addr)
    }

    /// Register a session for `raw_name`, replacing any older one under the same name.
    ///
    /// Returns the normalized name and the new session id.
    pub fn on_connect(
        &self,
        raw_name: &str,
        tx: mpsc::UnboundedSender<Message>,
    ) -> (String, Uuid) {
        let name = normalize_server_name(raw_name);
        let session = Session {
            id: Uuid::new_v4(),
            name: name.clone(),
            connected_at: SystemTime::now(),
            tx,
        };
        let id = session.id;
        if let Some(previous) = self.sessions.insert(name.clone(), session) {
            info!(server = %name, "replacing existing ingress session");
            let _ = previous.tx.send(Message::Close(None));
        }
        info!(server = %name, raw = raw_name, "game server connected");

        if let Some(entry) = self.pool.get(&name) {
            let pool = self.pool.clone();
            tokio::spawn(async move {
                if let Err(err) = pool.connect(&entry).await {
                    warn!(server = %entry.name(), error = %err, "console not ready after ingress connect");
                }
            });
        } else {
            debug!(server = %name, "no remote console configured for server");
        }

        self.emit(IngressEvent::ServerUp {
            server: name.clone(),
        });
        (name, id)
    }

    /// Parse one frame received on the session named `session`.
    ///
    /// `Ok(None)` means the frame was valid but carries nothing worth relaying.
    pub fn on_message(&self, raw: &str, session: &str) -> Result<Option<GameEvent>, EventParseError> {
        let payload: GameEventPayload = serde_json::from_str(raw)?;
        let event = parse_event(payload, session)?;
        if let Some(event) = event.as_ref() {
            debug!(server = %event.server, player = %event.player.nickname, category = ?event.category(), "game event received");
        }
        Ok(event)
    }

    /// Socket for session `id` closed. Ignored when a newer session took over the name.
    pub async fn on_close(&self, name: &str, id: Uuid) {
        let name = normalize_server_name(name);
        if self
            .sessions
            .remove_if(&name, |_, session| session.id == id)
            .is_some()
        {
            info!(server = %name, "game server disconnected");
            self.teardown(&name).await;
        }
    }

    /// Close the session for `server` together with its console entry.
    ///
    /// Returns whether a session existed.
    pub async fn close_session(&self, server: &str) -> bool {
        let name = normalize_server_name(server);
        let removed = self.sessions.remove(&name);
        match removed {
            Some((_, session)) => {
                let _ = session.tx.send(Message::Close(None));
                info!(server = %name, "ingress session closed");
                self.teardown(&name).await;
                true
            }
            None => {
                self.pool.remove(&name).await;
                false
            }
        }
    }

    /// Snapshot of live sessions, oldest first.
    pub fn list_active(&self) -> Vec<SessionSummary> {
        let mut sessions: Vec<_> = self
            .sessions
            .iter()
            .map(|session| (session.connected_at, SessionSummary::from(session.value())))
            .collect();
        sessions.sort_by_key(|(connected_at, _)| *connected_at);
        sessions.into_iter().map(|(_, summary)| summary).collect()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is live.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub(crate) fn emit(&self, event: IngressEvent) {
        if self.events.send(event).is_err() {
            warn!("ingress event dropped: dispatcher is gone");
        }
    }

    async fn teardown(&self, name: &str) {
        if self.pool.remove(name).await {
            debug!(server = name, "console entry removed with session");
        }
        self.emit(IngressEvent::ServerDown {
            server: name.to_string(),
        });
    }
}

/// Upgrade a game server connection into an ingress session.
async fn ingress_handler(
    State(registry): State<Arc<SessionRegistry>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let raw_name = headers
        .get(SERVER_NAME_HEADER)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .unwrap_or_default();
    ws.on_upgrade(move |socket| handle_session(registry, socket, raw_name))
}

async fn handle_session(registry: Arc<SessionRegistry>, socket: WebSocket, raw_name: String) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sender.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    let (name, id) = registry.on_connect(&raw_name, outbound_tx.clone());

    while let Some(message) = receiver.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    warn!(server = %name, error = %EventParseError::Encoding, "dropping binary frame");
                    continue;
                }
            },
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
                continue;
            }
            Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => break,
            Err(err) => {
                warn!(server = %name, error = %err, "ingress websocket error");
                break;
            }
        };

        match registry.on_message(&text, &name) {
            Ok(Some(event)) => registry.emit(IngressEvent::Game(event)),
            Ok(None) => {}
            Err(err) => warn!(server = %name, error = %err, "dropping malformed event"),
        }
    }

    registry.on_close(&name, id).await;
    finalize(writer_task, outbound_tx).await;
}

async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}

fn parse_event(
    payload: GameEventPayload,
    session: &str,
) -> Result<Option<GameEvent>, EventParseError> {
    let player = payload.player.unwrap_or_default();
    let player = PlayerInfo {
        nickname: player.nickname,
        uuid: player.uuid,
        is_op: player.is_op,
    };

    let kind = match payload.sub_type.as_str() {
        "join" => GameEventKind::Join,
        "quit" => GameEventKind::Quit,
        "death" => GameEventKind::Death {
            message: payload.message.filter(|message| !message.is_empty()),
        },
        "chat" => GameEventKind::Chat {
            message: payload.message.unwrap_or_default(),
        },
        "player_command" => GameEventKind::PlayerCommand {
            command: payload.message.unwrap_or_default(),
        },
        "achievement" => {
            let Some(advancement) = payload.advancement else {
                debug!(player = %player.nickname, "ignoring achievement without advancement");
                return Ok(None);
            };
            let title = advancement.title().or(advancement.text());
            let Some(title) = title else {
                debug!(player = %player.nickname, "ignoring achievement without title");
                return Ok(None);
            };
            if advancement.title().is_none() && advancement.has_criterion("has_the_recipe") {
                debug!(player = %player.nickname, "ignoring recipe unlock");
                return Ok(None);
            }
            GameEventKind::Achievement {
                title: title.to_string(),
            }
        }
        other => return Err(EventParseError::UnknownSubType(other.to_string())),
    };

    let server = match payload.server_name.as_deref() {
        Some(raw) if !raw.trim().is_empty() => normalize_server_name(raw),
        _ => session.to_string(),
    };
    Ok(Some(GameEvent {
        server,
        player,
        kind,
    }))
}

/// Canonical form of a server name as reported by a game server.
///
/// Strips surrounding quotes and whitespace, then decodes either `\uXXXX`
/// escapes or `%XX` escapes, repeating until the name is stable.
pub fn normalize_server_name(raw: &str) -> String {
    let mut current = raw.to_string();
    loop {
        let next = normalize_step(&current);
        if next == current {
            break;
        }
        current = next;
    }
    if current.is_empty() {
        UNNAMED_SERVER.to_string()
    } else {
        current
    }
}

fn normalize_step(raw: &str) -> String {
    let trimmed = trim_quotes(raw);
    let decoded = if has_unicode_escape(trimmed) {
        decode_unicode_escapes(trimmed)
    } else if has_percent_escape(trimmed) {
        decode_percent(trimmed).unwrap_or_else(|| trimmed.to_string())
    } else {
        trimmed.to_string()
    };
    trim_quotes(&decoded).to_string()
}

fn trim_quotes(value: &str) -> &str {
    value.trim_matches(|c: char| c == '"' || c == '\'' || c.is_whitespace())
}

fn has_unicode_escape(value: &str) -> bool {
    value
        .match_indices("\\u")
        .any(|(index, _)| hex_digits(&value[index + 2..], 4).is_some())
}

fn has_percent_escape(value: &str) -> bool {
    value
        .match_indices('%')
        .any(|(index, _)| hex_digits(&value[index + 1..], 2).is_some())
}

fn hex_digits(value: &str, count: usize) -> Option<u32> {
    let digits = value.get(..count)?;
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}

fn decode_unicode_escapes(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(index) = rest.find("\\u") {
        out.push_str(&rest[..index]);
        let after = &rest[index + 2..];
        match hex_digits(after, 4).and_then(char::from_u32) {
            Some(decoded) => {
                out.push(decoded);
                rest = &after[4..];
            }
            None => {
                out.push_str("\\u");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Decode `%XX` sequences; `None` when the result is not UTF-8.
fn decode_percent(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        let escaped = match bytes[index] {
            b'%' => value.get(index + 1..).and_then(|rest| hex_digits(rest, 2)),
            _ => None,
        };
        match escaped {
            Some(byte) => {
                out.push(byte as u8);
                index += 3;
            }
            None => {
                out.push(bytes[index]);
                index += 1;
            }
        }
    }
    String::from_utf8(out).ok()
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id,
            name: session.name.clone(),
            connected_at: crate::dto::format_system_time(session.connected_at),
        }
    }
}
