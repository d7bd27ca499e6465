use std::convert::Infallible;

use axum::{Router, extract::State, response::sse::Sse, routing::get};
use futures::Stream;
use tracing::info;

use crate::{services::sse_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/sse/deliveries",
    tag = "sse",
    responses((status = 200, description = "Group deliveries for the chat bot", content_type = "text/event-stream", body = String))
)]
/// Stream group messages produced from game events.
pub async fn deliveries_stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>> {
    let receiver = sse_service::subscribe_deliveries(&state);
    info!(subscribers = state.deliveries().subscriber_count(), "new delivery SSE connection");
    sse_service::broadcast_handshake(state.deliveries());
    sse_service::to_sse_stream(receiver)
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/sse/deliveries", get(deliveries_stream))
}
