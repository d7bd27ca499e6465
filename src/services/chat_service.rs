use crate::{
    dto::chat::{
        BindReply, BindRequestDto, CommandReplyDto, CommandRequestDto, GroupMessageDto,
        GroupMessageReply,
    },
    error::ServiceError,
    state::SharedState,
};

/// Run a console command for a chat member and return the line to post back.
pub async fn run_command(state: &SharedState, request: CommandRequestDto) -> CommandReplyDto {
    state.relay().run_command(request.into()).await.into()
}

/// Relay a group chat line to the servers it addresses.
pub async fn forward_message(state: &SharedState, request: GroupMessageDto) -> GroupMessageReply {
    GroupMessageReply {
        forwarded: state.relay().forward_group_message(request.into()).await,
    }
}

/// Bind a group display name to a known player.
pub async fn bind(state: &SharedState, request: BindRequestDto) -> Result<BindReply, ServiceError> {
    let outcome = state
        .identity()
        .bind(
            &request.player,
            &request.account,
            &request.group_id,
            &request.display_name,
        )
        .await?;
    Ok(outcome.into())
}
