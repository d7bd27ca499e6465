use tracing::warn;

use crate::{
    dto::health::{HealthResponse, StatusResponse},
    state::SharedState,
};

/// Report `ok` while the ingress listener is accepting game servers.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    if state.registry().is_running().await {
        HealthResponse::ok()
    } else {
        warn!("ingress listener is not running");
        HealthResponse::degraded()
    }
}

/// Collect the runtime view served on `/status`.
pub async fn runtime_status(state: &SharedState) -> StatusResponse {
    let summary = state.config().current().summary();
    StatusResponse {
        ingress_addr: state
            .registry()
            .local_addr()
            .await
            .map(|addr| addr.to_string()),
        sessions: state.registry().list_active(),
        pool: state.pool().stats().await,
        servers: summary.servers,
        groups: summary.groups,
        banned_words: summary.banned_words,
        players: state.identity().book().len(),
        subscribers: state.deliveries().subscriber_count(),
        cache: state.cache().status().await,
    }
}
