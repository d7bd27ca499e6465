use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;
use tracing::debug;

use crate::{
    dto::sse::{GroupMessageEvent, ServerEvent},
    state::sse::SseHub,
};

/// SSE event name carrying group deliveries.
pub const GROUP_MESSAGE_EVENT: &str = "group.message";

/// A line could not be handed to the chat network.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Nobody is listening on the delivery stream.
    #[error("no chat client is subscribed to deliveries")]
    NoSubscriber,
    /// The delivery could not be serialized.
    #[error("failed to encode delivery")]
    Encode(#[from] serde_json::Error),
}

/// Outbound side of the chat network.
pub trait ChatSink: Send + Sync {
    /// Post `text` into the chat group `group_id`.
    fn send_group_message(
        &self,
        group_id: &str,
        text: String,
    ) -> BoxFuture<'static, Result<(), DeliveryError>>;
}

/// Publishes deliveries on the SSE hub the chat bot listens to.
pub struct SseChatSink {
    hub: Arc<SseHub>,
}

impl SseChatSink {
    /// Publish on `hub`.
    pub fn new(hub: Arc<SseHub>) -> Self {
        Self { hub }
    }
}

impl ChatSink for SseChatSink {
    fn send_group_message(
        &self,
        group_id: &str,
        text: String,
    ) -> BoxFuture<'static, Result<(), DeliveryError>> {
        let event = GroupMessageEvent {
            group_id: group_id.to_string(),
            text,
        };
        let result = ServerEvent::json(Some(GROUP_MESSAGE_EVENT.to_string()), &event)
            .map_err(DeliveryError::from)
            .and_then(|payload| match self.hub.broadcast(payload) {
                0 => Err(DeliveryError::NoSubscriber),
                receivers => {
                    debug!(group = %event.group_id, receivers, "group message published");
                    Ok(())
                }
            });
        Box::pin(async move { result })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Records deliveries; groups listed in `unreachable` fail.
    #[derive(Default)]
    pub struct RecordingSink {
        pub delivered: Mutex<Vec<(String, String)>>,
        pub unreachable: Vec<String>,
    }

    impl RecordingSink {
        pub fn delivered(&self) -> Vec<(String, String)> {
            self.delivered.lock().unwrap().clone()
        }
    }

    impl ChatSink for RecordingSink {
        fn send_group_message(
            &self,
            group_id: &str,
            text: String,
        ) -> BoxFuture<'static, Result<(), DeliveryError>> {
            let result = if self.unreachable.iter().any(|group| group == group_id) {
                Err(DeliveryError::NoSubscriber)
            } else {
                self.delivered
                    .lock()
                    .unwrap()
                    .push((group_id.to_string(), text));
                Ok(())
            };
            Box::pin(async move { result })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sse_sink_requires_a_subscriber() {
        let hub = Arc::new(SseHub::new(8));
        let sink = SseChatSink::new(hub.clone());
        assert!(matches!(
            sink.send_group_message("500", "hi".into()).await,
            Err(DeliveryError::NoSubscriber)
        ));

        let mut receiver = hub.subscribe();
        sink.send_group_message("500", "hi".into()).await.unwrap();
        let event = receiver.recv().await.unwrap();
        assert_eq!(event.event.as_deref(), Some(GROUP_MESSAGE_EVENT));
        assert_eq!(event.data, r#"{"group_id":"500","text":"hi"}"#);
    }
}
