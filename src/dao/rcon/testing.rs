//! Scripted in-process console used by tests.

use std::sync::Arc;

use tokio::{
    net::{TcpListener, TcpStream},
    sync::Mutex,
    task::JoinHandle,
};

use super::codec::{
    AUTH_FAILED_ID, PACKET_AUTH, PACKET_AUTH_RESPONSE, PACKET_RESPONSE, Packet, read_packet,
    write_packet,
};

/// How the mock answers exec packets.
#[derive(Debug, Clone, Copy)]
pub enum MockReply {
    /// Reply `echo: <command>` immediately.
    Echo,
    /// Collect two commands, then answer them in reverse order.
    ReverseOrder,
    /// Drop the connection as soon as a command arrives.
    Hangup,
    /// Never answer.
    Silent,
}

/// Console listening on an ephemeral local port.
pub struct MockConsole {
    port: u16,
    received: Arc<Mutex<Vec<String>>>,
    accepted: Arc<Mutex<usize>>,
    task: JoinHandle<()>,
}

impl MockConsole {
    /// Listen on an ephemeral local port and serve every connection with `reply`.
    pub async fn start(password: &str, reply: MockReply) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let received = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(Mutex::new(0));
        let password = password.to_string();

        let task = {
            let received = received.clone();
            let accepted = accepted.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    *accepted.lock().await += 1;
                    tokio::spawn(serve(stream, password.clone(), reply, received.clone()));
                }
            })
        };

        Self {
            port,
            received,
            accepted,
            task,
        }
    }

    /// Port the mock listens on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Commands received so far across all connections.
    pub async fn received(&self) -> Vec<String> {
        self.received.lock().await.clone()
    }

    /// Number of TCP connections accepted.
    pub async fn accepted(&self) -> usize {
        *self.accepted.lock().await
    }
}

impl Drop for MockConsole {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    mut stream: TcpStream,
    password: String,
    reply: MockReply,
    received: Arc<Mutex<Vec<String>>>,
) {
    let Ok(auth) = read_packet(&mut stream).await else {
        return;
    };
    if auth.kind != PACKET_AUTH {
        return;
    }
    // Real servers emit an empty response value before the auth verdict.
    let _ = write_packet(&mut stream, &Packet::new(auth.id, PACKET_RESPONSE, "")).await;
    let verdict = if auth.body == password {
        auth.id
    } else {
        AUTH_FAILED_ID
    };
    if write_packet(&mut stream, &Packet::new(verdict, PACKET_AUTH_RESPONSE, ""))
        .await
        .is_err()
        || verdict == AUTH_FAILED_ID
    {
        return;
    }

    let mut held: Vec<Packet> = Vec::new();
    while let Ok(packet) = read_packet(&mut stream).await {
        received.lock().await.push(packet.body.clone());
        match reply {
            MockReply::Echo => {
                let response =
                    Packet::new(packet.id, PACKET_RESPONSE, format!("echo: {}", packet.body));
                if write_packet(&mut stream, &response).await.is_err() {
                    return;
                }
            }
            MockReply::ReverseOrder => {
                held.push(packet);
                if held.len() == 2 {
                    for pending in held.drain(..).rev() {
                        let response = Packet::new(
                            pending.id,
                            PACKET_RESPONSE,
                            format!("echo: {}", pending.body),
                        );
                        if write_packet(&mut stream, &response).await.is_err() {
                            return;
                        }
                    }
                }
            }
            MockReply::Hangup => return,
            MockReply::Silent => {}
        }
    }
}
