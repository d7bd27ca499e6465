use axum::Router;

use crate::state::SharedState;

/// Reload and flush endpoints.
pub mod admin;
/// Endpoints the chat bot calls.
pub mod chat;
/// Swagger UI.
pub mod docs;
/// Health and status endpoints.
pub mod health;
/// Delivery stream for the chat bot.
pub mod sse;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(sse::router())
        .merge(admin::router())
        .merge(chat::router());

    let docs_router = docs::router(state.clone());

    api_router.merge(docs_router).with_state(state)
}
