use serde::Serialize;
use utoipa::ToSchema;

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    /// SSE event name; `None` sends an unnamed event.
    pub event: Option<String>,
    /// Serialized payload.
    pub data: String,
}

impl ServerEvent {
    /// Wrap an already serialized payload.
    pub fn new(event: Option<String>, data: String) -> Self {
        Self { event, data }
    }

    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to a delivery stream subscriber when it connects.
pub struct Handshake {
    /// Identifier of the SSE stream.
    pub stream: String,
    /// Human-readable message confirming the subscription.
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
/// Line the chat bot should post into a group (`group.message`).
pub struct GroupMessageEvent {
    /// Target group.
    pub group_id: String,
    /// Line to post.
    pub text: String,
}
