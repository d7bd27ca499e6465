use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicI32, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use tokio::{
    io::AsyncWriteExt,
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{Mutex, oneshot},
    task::JoinHandle,
    time::timeout,
};
use tracing::debug;

use super::{
    codec::{
        AUTH_FAILED_ID, MAX_COMMAND_LEN, PACKET_AUTH, PACKET_AUTH_RESPONSE, PACKET_EXEC, Packet,
        read_packet, write_packet,
    },
    error::{RconError, RconResult},
};

/// How long [`RconClient::execute`] waits for the correlated response.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

const AUTH_REQUEST_ID: i32 = 1;
const FIRST_COMMAND_ID: i32 = 2;

type PendingResponses = Arc<DashMap<i32, oneshot::Sender<String>>>;

/// Authenticated remote-console link.
///
/// A background reader task routes each response frame to the waiter that
/// registered its request id, so concurrent commands on one link never
/// receive each other's output.
pub struct RconClient {
    addr: String,
    writer: Mutex<OwnedWriteHalf>,
    pending: PendingResponses,
    next_id: AtomicI32,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl std::fmt::Debug for RconClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RconClient")
            .field("addr", &self.addr)
            .field("alive", &self.alive.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl RconClient {
    /// Open a TCP connection and authenticate with `password`.
    ///
    /// The caller is responsible for bounding the whole handshake with a timeout.
    pub async fn connect(host: &str, port: u16, password: &str) -> RconResult<Self> {
        let addr = format!("{host}:{port}");
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| RconError::Connect {
                addr: addr.clone(),
                source,
            })?;
        stream.set_nodelay(true)?;
        let (mut read_half, mut write_half) = stream.into_split();

        write_packet(
            &mut write_half,
            &Packet::new(AUTH_REQUEST_ID, PACKET_AUTH, password),
        )
        .await?;

        loop {
            let packet = read_packet(&mut read_half).await?;
            if packet.kind != PACKET_AUTH_RESPONSE {
                // Some servers send an empty response value ahead of the auth reply.
                continue;
            }
            if packet.id == AUTH_FAILED_ID {
                return Err(RconError::AuthRejected);
            }
            if packet.id == AUTH_REQUEST_ID {
                break;
            }
        }

        let pending: PendingResponses = Arc::new(DashMap::new());
        let alive = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(read_loop(
            addr.clone(),
            read_half,
            pending.clone(),
            alive.clone(),
        ));

        debug!(%addr, "remote console authenticated");
        Ok(Self {
            addr,
            writer: Mutex::new(write_half),
            pending,
            next_id: AtomicI32::new(FIRST_COMMAND_ID),
            alive,
            reader,
        })
    }

    /// Address this client is connected to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Whether the underlying stream is still usable.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Send a command and wait for its correlated response.
    pub async fn execute(&self, command: &str) -> RconResult<String> {
        let id = self.allocate_id();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        if let Err(err) = self.write_command(id, command).await {
            self.pending.remove(&id);
            return Err(err);
        }

        match timeout(RESPONSE_TIMEOUT, rx).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(_)) => Err(RconError::Closed),
            Err(_) => {
                self.pending.remove(&id);
                Err(RconError::ResponseTimeout)
            }
        }
    }

    /// Send a command without waiting for output; the response is discarded.
    pub async fn send(&self, command: &str) -> RconResult<()> {
        let id = self.allocate_id();
        self.write_command(id, command).await
    }

    /// Shut the stream down and stop the reader task.
    pub async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.reader.abort();
        self.pending.clear();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    async fn write_command(&self, id: i32, command: &str) -> RconResult<()> {
        if command.len() > MAX_COMMAND_LEN {
            return Err(RconError::CommandTooLong {
                max: MAX_COMMAND_LEN,
            });
        }
        if !self.is_alive() {
            return Err(RconError::Closed);
        }

        let mut writer = self.writer.lock().await;
        let result = write_packet(&mut *writer, &Packet::new(id, PACKET_EXEC, command)).await;
        if result.is_err() {
            self.alive.store(false, Ordering::SeqCst);
        }
        result
    }

    fn allocate_id(&self) -> i32 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if id < FIRST_COMMAND_ID {
            // Wrapped past i32::MAX; restart the sequence.
            self.next_id.store(FIRST_COMMAND_ID + 1, Ordering::Relaxed);
            return FIRST_COMMAND_ID;
        }
        id
    }
}

impl Drop for RconClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(
    addr: String,
    mut reader: OwnedReadHalf,
    pending: PendingResponses,
    alive: Arc<AtomicBool>,
) {
    loop {
        match read_packet(&mut reader).await {
            Ok(packet) => match pending.remove(&packet.id) {
                Some((_, waiter)) => {
                    let _ = waiter.send(packet.body);
                }
                None => debug!(%addr, id = packet.id, "dropping uncorrelated response"),
            },
            Err(err) => {
                debug!(%addr, error = %err, "remote console stream ended");
                break;
            }
        }
    }

    alive.store(false, Ordering::SeqCst);
    // Dropping the senders wakes every waiter with a closed-channel error.
    pending.clear();
}
