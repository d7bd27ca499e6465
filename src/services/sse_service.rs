use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::{
    dto::sse::{Handshake, ServerEvent},
    state::{SharedState, sse::SseHub},
};

/// Event name of the greeting sent when a subscriber connects.
pub const HANDSHAKE_EVENT: &str = "handshake";

/// Subscribe to the group delivery stream.
pub fn subscribe_deliveries(state: &SharedState) -> broadcast::Receiver<ServerEvent> {
    state.deliveries().subscribe()
}

/// Greet subscribers of the delivery stream.
pub fn broadcast_handshake(hub: &SseHub) {
    let handshake = Handshake {
        stream: "deliveries".into(),
        message: "delivery stream connected".into(),
    };
    match ServerEvent::json(Some(HANDSHAKE_EVENT.to_string()), &handshake) {
        Ok(event) => {
            hub.broadcast(event);
        }
        Err(err) => warn!(error = %err, "failed to encode handshake"),
    }
}

/// Convert a broadcast receiver into an SSE response, forwarding events until
/// the client disconnects.
pub fn to_sse_stream(
    mut receiver: broadcast::Receiver<ServerEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            let mut event = Event::default().data(payload.data);
                            if let Some(name) = payload.event {
                                event = event.event(name);
                            }
                            if tx.send(Ok(event)).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "delivery stream subscriber lagged");
                            continue;
                        }
                    }
                }
            }
        }
        info!("delivery SSE stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
