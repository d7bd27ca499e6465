use tokio::sync::broadcast;

use crate::dto::sse::ServerEvent;

/// Simple broadcast hub wrapper used by the SSE services.
pub struct SseHub {
    sender: broadcast::Sender<ServerEvent>,
}

impl SseHub {
    /// Construct a new hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Send an event to all current subscribers, returning how many there were.
    pub fn broadcast(&self, event: ServerEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
