use axum::{Json, Router, extract::State, routing::get};

use crate::{
    dto::health::{HealthResponse, StatusResponse},
    services::health_service,
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/healthcheck",
    tag = "health",
    responses((status = 200, description = "Bridge health", body = HealthResponse))
)]
/// Return `ok` while the ingress listener is running.
pub async fn healthcheck(State(state): State<SharedState>) -> Json<HealthResponse> {
    let status = health_service::health_status(&state).await;
    Json(status)
}

#[utoipa::path(
    get,
    path = "/status",
    tag = "health",
    responses((status = 200, description = "Sessions, console links and queue state", body = StatusResponse))
)]
/// Describe live sessions, console links and the write-behind queue.
pub async fn status(State(state): State<SharedState>) -> Json<StatusResponse> {
    Json(health_service::runtime_status(&state).await)
}

/// Configure the health routes subtree.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/healthcheck", get(healthcheck))
        .route("/status", get(status))
}
