use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{services::documentation::ApiDoc, state::SharedState};

/// Swagger UI mount point.
pub const DOCS_PATH: &str = "/docs";
/// Raw OpenAPI document served alongside the UI.
pub const OPENAPI_PATH: &str = "/api-doc/openapi.json";

/// Serve the Swagger UI for the admin and chat endpoints.
pub fn router(state: SharedState) -> Router<SharedState> {
    let ui: Router<SharedState> = SwaggerUi::new(DOCS_PATH)
        .url(OPENAPI_PATH, ApiDoc::openapi())
        .into();

    ui.with_state(state)
}
