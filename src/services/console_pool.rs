use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use thiserror::Error;
use tokio::{
    sync::{Mutex, watch},
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    dao::rcon::{RconClient, RconError},
    dto::health::PoolStats,
    state::{
        console::{ConsoleEvent, ConsolePhase, ConsoleStateMachine},
        snapshot::{ConfigSnapshot, ServerDescriptor},
    },
};

/// Default bound on a connect-and-authenticate handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Typed outcomes of pool operations that did not deliver a command.
#[derive(Debug, Error)]
pub enum ConsoleError {
    /// No usable descriptor exists for the server.
    #[error("server `{server}` has no remote console configured")]
    NotConfigured {
        /// Server name.
        server: String,
    },
    /// Another caller is already connecting this entry.
    #[error("server `{server}` is already connecting")]
    AlreadyConnecting {
        /// Server name.
        server: String,
    },
    /// Handshake refused, failed, or superseded.
    #[error("failed to connect to server `{server}`")]
    ConnectFailed {
        /// Server name.
        server: String,
        /// Protocol or socket failure.
        #[source]
        source: RconError,
    },
    /// Handshake did not authenticate in time.
    #[error("connecting to server `{server}` timed out after {}s", .after.as_secs())]
    ConnectTimeout {
        /// Server name.
        server: String,
        /// Timeout that elapsed.
        after: Duration,
    },
    /// Writing to an established link failed; the link was torn down.
    #[error("failed to send to server `{server}`")]
    SendFailed {
        /// Server name.
        server: String,
        /// Protocol or socket failure.
        #[source]
        source: RconError,
    },
    /// The command was sent but no response arrived.
    #[error("server `{server}` did not answer in time")]
    ResponseTimeout {
        /// Server name.
        server: String,
    },
}

/// What happened to a delivered command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The correlated response text.
    Response(String),
    /// Sent without waiting for output.
    Sent,
}

struct EntryLink {
    machine: ConsoleStateMachine,
    descriptor: ServerDescriptor,
    client: Option<Arc<RconClient>>,
}

/// One server's console connection and its state machine.
pub struct PoolEntry {
    name: String,
    link: Mutex<EntryLink>,
}

impl PoolEntry {
    fn new(descriptor: ServerDescriptor) -> Self {
        Self {
            name: descriptor.name.clone(),
            link: Mutex::new(EntryLink {
                machine: ConsoleStateMachine::new(),
                descriptor,
                client: None,
            }),
        }
    }

    /// Server name this entry belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current link phase.
    pub async fn phase(&self) -> ConsolePhase {
        self.link.lock().await.machine.phase()
    }

    /// Descriptor the entry last connected (or will connect) with.
    pub async fn descriptor(&self) -> ServerDescriptor {
        self.link.lock().await.descriptor.clone()
    }
}

/// Registry of remote-console connections, at most one entry per server name.
pub struct ConnectionPool {
    entries: DashMap<String, Arc<PoolEntry>>,
    snapshot: watch::Receiver<Arc<ConfigSnapshot>>,
    connect_timeout: Duration,
}

impl ConnectionPool {
    /// Create an empty pool that resolves descriptors from `snapshot`.
    pub fn new(snapshot: watch::Receiver<Arc<ConfigSnapshot>>, connect_timeout: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            snapshot,
            connect_timeout,
        }
    }

    /// Look up or lazily create the entry for `server`.
    ///
    /// Returns `None` when the current snapshot has no complete descriptor for it.
    pub fn get(&self, server: &str) -> Option<Arc<PoolEntry>> {
        if let Some(entry) = self.entries.get(server) {
            return Some(entry.value().clone());
        }

        let descriptor = {
            let snapshot = self.snapshot.borrow();
            snapshot.server(server).cloned()
        }?;
        if !descriptor.is_complete() {
            debug!(server, "remote console descriptor incomplete");
            return None;
        }

        let entry = self
            .entries
            .entry(server.to_string())
            .or_insert_with(|| Arc::new(PoolEntry::new(descriptor)))
            .clone();
        Some(entry)
    }

    /// Entry for `server` if one exists, without creating it.
    pub fn existing(&self, server: &str) -> Option<Arc<PoolEntry>> {
        self.entries.get(server).map(|entry| entry.value().clone())
    }

    /// Names of every entry currently in the pool.
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pool holds no entry.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Make sure `entry` holds an authenticated link, connecting if needed.
    ///
    /// Concurrent callers do not queue: while a handshake is running every other
    /// attempt fails with [`ConsoleError::AlreadyConnecting`].
    pub async fn connect(&self, entry: &PoolEntry) -> Result<Arc<RconClient>, ConsoleError> {
        let (generation, descriptor) = {
            let mut link = entry.link.lock().await;
            if let Some(client) = link.client.as_ref() {
                if client.is_alive() {
                    return Ok(client.clone());
                }
                let _ = link.machine.fire(ConsoleEvent::LinkLost);
                link.client = None;
            }
            link.machine
                .fire(ConsoleEvent::ConnectStarted)
                .map_err(|_| ConsoleError::AlreadyConnecting {
                    server: entry.name.clone(),
                })?;
            (link.machine.generation(), link.descriptor.clone())
        };

        let port = descriptor.port.unwrap_or_default();
        let attempt = timeout(
            self.connect_timeout,
            RconClient::connect(&descriptor.host, port, &descriptor.secret),
        )
        .await;

        let mut link = entry.link.lock().await;
        if link.machine.generation() != generation {
            // Disconnected or reconfigured while the handshake ran.
            if let Ok(Ok(client)) = attempt {
                client.close().await;
            }
            return Err(ConsoleError::ConnectFailed {
                server: entry.name.clone(),
                source: RconError::Closed,
            });
        }

        match attempt {
            Ok(Ok(client)) => {
                let _ = link.machine.fire(ConsoleEvent::Authenticated);
                let client = Arc::new(client);
                link.client = Some(client.clone());
                info!(server = %entry.name, addr = client.addr(), "remote console connected");
                Ok(client)
            }
            Ok(Err(source)) => {
                let _ = link.machine.fire(ConsoleEvent::ConnectFailed);
                warn!(server = %entry.name, error = %source, "remote console connect failed");
                Err(ConsoleError::ConnectFailed {
                    server: entry.name.clone(),
                    source,
                })
            }
            Err(_) => {
                let _ = link.machine.fire(ConsoleEvent::ConnectFailed);
                warn!(server = %entry.name, "remote console connect timed out");
                Err(ConsoleError::ConnectTimeout {
                    server: entry.name.clone(),
                    after: self.connect_timeout,
                })
            }
        }
    }

    /// Deliver `text`, connecting first if needed.
    ///
    /// Each request carries its own correlation id, so concurrent sends on one
    /// entry each receive their own response.
    pub async fn send_command(
        &self,
        entry: &PoolEntry,
        text: &str,
        expect_response: bool,
    ) -> Result<CommandOutcome, ConsoleError> {
        let client = self.connect(entry).await?;

        let result = if expect_response {
            client.execute(text).await.map(CommandOutcome::Response)
        } else {
            client.send(text).await.map(|()| CommandOutcome::Sent)
        };

        match result {
            Ok(outcome) => Ok(outcome),
            Err(RconError::ResponseTimeout) => Err(ConsoleError::ResponseTimeout {
                server: entry.name.clone(),
            }),
            Err(source @ RconError::CommandTooLong { .. }) => Err(ConsoleError::SendFailed {
                server: entry.name.clone(),
                source,
            }),
            Err(source) => {
                self.drop_link(entry, &client).await;
                warn!(server = %entry.name, error = %source, "remote console send failed");
                Err(ConsoleError::SendFailed {
                    server: entry.name.clone(),
                    source,
                })
            }
        }
    }

    /// Close the entry's link; the next command reconnects lazily.
    pub async fn disconnect(&self, entry: &PoolEntry) {
        let client = {
            let mut link = entry.link.lock().await;
            let _ = link.machine.fire(ConsoleEvent::Disconnect);
            link.client.take()
        };
        if let Some(client) = client {
            client.close().await;
            info!(server = %entry.name, "remote console disconnected");
        }
    }

    /// Adopt `descriptor` if any link setting differs, disconnecting the live link.
    ///
    /// Returns `false` and leaves the connection untouched when nothing relevant changed.
    pub async fn update_descriptor(&self, entry: &PoolEntry, descriptor: ServerDescriptor) -> bool {
        {
            let mut link = entry.link.lock().await;
            if link.descriptor.same_link_settings(&descriptor) {
                return false;
            }
            link.descriptor = descriptor;
        }
        info!(server = %entry.name, "remote console settings changed");
        self.disconnect(entry).await;
        true
    }

    /// Update the entry for `descriptor.name`, creating it when absent.
    ///
    /// Returns whether an existing connection was invalidated.
    pub async fn upsert(&self, descriptor: ServerDescriptor) -> bool {
        if let Some(entry) = self.existing(&descriptor.name) {
            return self.update_descriptor(&entry, descriptor).await;
        }
        if !descriptor.is_complete() {
            return false;
        }
        self.entries
            .entry(descriptor.name.clone())
            .or_insert_with(|| Arc::new(PoolEntry::new(descriptor)));
        false
    }

    /// Drop the entry for `server`, closing its link. Absent entries are ignored.
    pub async fn remove(&self, server: &str) -> bool {
        let Some((_, entry)) = self.entries.remove(server) else {
            return false;
        };
        self.disconnect(&entry).await;
        true
    }

    /// Close every link and empty the pool.
    pub async fn disconnect_all(&self) {
        let names = self.names();
        for name in names {
            self.remove(&name).await;
        }
    }

    /// Tally of entries per phase.
    pub async fn stats(&self) -> PoolStats {
        let entries: Vec<_> = self
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let mut stats = PoolStats::default();
        for entry in entries {
            match entry.phase().await {
                ConsolePhase::Connected => stats.connected += 1,
                ConsolePhase::Connecting => stats.connecting += 1,
                ConsolePhase::Disconnected => stats.disconnected += 1,
            }
        }
        stats
    }

    async fn drop_link(&self, entry: &PoolEntry, failed: &Arc<RconClient>) {
        let mut link = entry.link.lock().await;
        let same = link
            .client
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, failed));
        if same {
            let _ = link.machine.fire(ConsoleEvent::LinkLost);
            link.client = None;
            drop(link);
            failed.close().await;
        }
    }
}
