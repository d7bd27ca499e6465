use axum::{Json, Router, extract::State, routing::post};
use axum_valid::Valid;

use crate::{
    dto::chat::{
        BindReply, BindRequestDto, CommandReplyDto, CommandRequestDto, GroupMessageDto,
        GroupMessageReply,
    },
    error::AppError,
    services::chat_service,
    state::SharedState,
};

/// Endpoints the chat bot calls for group → server traffic.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/chat/command", post(run_command))
        .route("/chat/message", post(forward_message))
        .route("/chat/bind", post(bind))
}

/// Run a console command on behalf of a group member.
#[utoipa::path(
    post,
    path = "/chat/command",
    tag = "chat",
    request_body = CommandRequestDto,
    responses((status = 200, description = "Console output or the reason it did not run", body = CommandReplyDto))
)]
pub async fn run_command(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CommandRequestDto>>,
) -> Json<CommandReplyDto> {
    Json(chat_service::run_command(&state, payload).await)
}

/// Relay a group chat line into the game.
#[utoipa::path(
    post,
    path = "/chat/message",
    tag = "chat",
    request_body = GroupMessageDto,
    responses((status = 200, description = "Servers the line reached", body = GroupMessageReply))
)]
pub async fn forward_message(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<GroupMessageDto>>,
) -> Json<GroupMessageReply> {
    Json(chat_service::forward_message(&state, payload).await)
}

/// Bind a group display name to an in-game player.
#[utoipa::path(
    post,
    path = "/chat/bind",
    tag = "chat",
    request_body = BindRequestDto,
    responses(
        (status = 200, description = "Binding stored", body = BindReply),
        (status = 404, description = "Player never joined a server")
    )
)]
pub async fn bind(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<BindRequestDto>>,
) -> Result<Json<BindReply>, AppError> {
    Ok(Json(chat_service::bind(&state, payload).await?))
}
