use axum::{Json, Router, extract::State, routing::post};

use crate::{
    dto::admin::{FlushReport, ReloadReport},
    error::AppError,
    services::admin_service,
    state::SharedState,
};

/// Operator endpoints for configuration and persistence.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/admin/reload", post(reload))
        .route("/admin/flush", post(flush))
}

/// Re-read the configuration shards and apply the difference.
#[utoipa::path(
    post,
    path = "/admin/reload",
    tag = "admin",
    responses(
        (status = 200, description = "Configuration reloaded", body = ReloadReport),
        (status = 400, description = "Configuration on disk is invalid"),
        (status = 409, description = "Another reload is running"),
        (status = 503, description = "Ingress could not be restarted")
    )
)]
pub async fn reload(State(state): State<SharedState>) -> Result<Json<ReloadReport>, AppError> {
    Ok(Json(admin_service::reload(&state).await?))
}

/// Write every queued file to disk now.
#[utoipa::path(
    post,
    path = "/admin/flush",
    tag = "admin",
    responses((status = 200, description = "Flush finished", body = FlushReport))
)]
pub async fn flush(State(state): State<SharedState>) -> Json<FlushReport> {
    Json(admin_service::flush(&state).await)
}
