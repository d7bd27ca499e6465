//! Request and reply bodies of the chat-side endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    dto::validation::{validate_group_id, validate_player_name},
    services::{
        identity::BindOutcome,
        relay::{CommandRejection, CommandReply, CommandRequest, GroupMessageRequest},
    },
};

/// Console command sent from a chat group.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CommandRequestDto {
    /// Target server; omit to address it with the prefix in `command`.
    pub server: Option<String>,
    /// Command text, e.g. `list` or `a/list` without `server`.
    #[validate(length(min = 1))]
    pub command: String,
    /// Group the command was sent from, used to resolve mentions.
    #[validate(custom(function = "validate_group_id"))]
    pub group_id: Option<String>,
    /// Chat account of the sender.
    #[validate(length(min = 1))]
    pub account: String,
    /// Caller is the bot owner.
    #[serde(default)]
    pub privileged: bool,
}

impl From<CommandRequestDto> for CommandRequest {
    fn from(dto: CommandRequestDto) -> Self {
        Self {
            server: dto.server,
            command: dto.command,
            group_id: dto.group_id,
            account: dto.account,
            privileged: dto.privileged,
        }
    }
}

/// Why a chat command did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RejectionCode {
    /// No server matches the name or prefix.
    UnknownServer,
    /// The server has no console settings.
    NotEnabled,
    /// The sender may not run this command.
    Forbidden,
    /// The console could not be reached.
    Unreachable,
}

impl From<CommandRejection> for RejectionCode {
    fn from(rejection: CommandRejection) -> Self {
        match rejection {
            CommandRejection::UnknownServer => RejectionCode::UnknownServer,
            CommandRejection::NotEnabled => RejectionCode::NotEnabled,
            CommandRejection::Forbidden => RejectionCode::Forbidden,
            CommandRejection::Unreachable => RejectionCode::Unreachable,
        }
    }
}

/// Reply line to post back into the group.
#[derive(Debug, Serialize, ToSchema)]
pub struct CommandReplyDto {
    /// Server the command was routed to, if any.
    pub server: Option<String>,
    /// Command as sent to the console.
    pub command: String,
    /// The console ran the command.
    pub executed: bool,
    /// Set when the command was not run.
    pub rejection: Option<RejectionCode>,
    /// Console output or the rejection message.
    pub text: String,
}

impl From<CommandReply> for CommandReplyDto {
    fn from(reply: CommandReply) -> Self {
        Self {
            executed: reply.executed(),
            server: reply.server,
            command: reply.command,
            rejection: reply.rejection.map(Into::into),
            text: reply.text,
        }
    }
}

/// Group chat line to relay into the game.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct GroupMessageDto {
    /// Group the line was posted in.
    #[validate(custom(function = "validate_group_id"))]
    pub group_id: String,
    /// Chat account of the sender.
    #[validate(length(min = 1))]
    pub account: String,
    /// Chat nickname, shown when the account is not bound to a player.
    #[validate(length(min = 1))]
    pub sender_name: String,
    /// Line text, including any server prefix.
    #[validate(length(min = 1))]
    pub message: String,
}

impl From<GroupMessageDto> for GroupMessageRequest {
    fn from(dto: GroupMessageDto) -> Self {
        Self {
            group_id: dto.group_id,
            account: dto.account,
            sender_name: dto.sender_name,
            message: dto.message,
        }
    }
}

/// Servers a group chat line was relayed to.
#[derive(Debug, Serialize, ToSchema)]
pub struct GroupMessageReply {
    /// Names of the servers that received the line.
    pub forwarded: Vec<String>,
}

/// Bind a group display name to an in-game player.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct BindRequestDto {
    /// In-game player name.
    #[validate(custom(function = "validate_player_name"))]
    pub player: String,
    /// Chat account of the caller.
    #[validate(length(min = 1))]
    pub account: String,
    /// Group the display name applies to.
    #[validate(custom(function = "validate_group_id"))]
    pub group_id: String,
    /// Name shown for the player in that group.
    #[validate(length(min = 1, max = 64))]
    pub display_name: String,
}

/// Result of a bind.
#[derive(Debug, Serialize, ToSchema)]
pub struct BindReply {
    /// Server the player record belongs to.
    pub server: String,
    /// An earlier display name in this group was overwritten.
    pub replaced: bool,
}

impl From<BindOutcome> for BindReply {
    fn from(outcome: BindOutcome) -> Self {
        Self {
            server: outcome.server,
            replaced: outcome.replaced,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_request_rejects_bad_fields() {
        let request = BindRequestDto {
            player: "two words".into(),
            account: "1001".into(),
            group_id: "abc".into(),
            display_name: "小明".into(),
        };
        let errors = request.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("player"));
        assert!(fields.contains_key("group_id"));
        assert!(!fields.contains_key("display_name"));
    }

    #[test]
    fn command_request_defaults_to_unprivileged() {
        let dto: CommandRequestDto =
            serde_json::from_str(r#"{"command":"a/list","account":"1001","group_id":"500"}"#)
                .unwrap();
        assert!(dto.validate().is_ok());
        let request = CommandRequest::from(dto);
        assert!(!request.privileged);
        assert_eq!(request.server, None);
    }
}
