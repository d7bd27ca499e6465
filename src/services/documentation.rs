use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the craftrelay admin and chat surface.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::health::status,
        crate::routes::sse::deliveries_stream,
        crate::routes::admin::reload,
        crate::routes::admin::flush,
        crate::routes::chat::run_command,
        crate::routes::chat::forward_message,
        crate::routes::chat::bind,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::StatusResponse,
            crate::dto::health::SessionSummary,
            crate::dto::health::PoolStats,
            crate::dto::admin::CacheStatus,
            crate::dto::admin::FlushReport,
            crate::dto::admin::ChangeList,
            crate::dto::admin::ReloadReport,
            crate::dto::chat::CommandRequestDto,
            crate::dto::chat::CommandReplyDto,
            crate::dto::chat::RejectionCode,
            crate::dto::chat::GroupMessageDto,
            crate::dto::chat::GroupMessageReply,
            crate::dto::chat::BindRequestDto,
            crate::dto::chat::BindReply,
            crate::dto::sse::GroupMessageEvent,
            crate::dto::ws::GameEventPayload,
        )
    ),
    tags(
        (name = "health", description = "Health and runtime status"),
        (name = "sse", description = "Server-sent delivery stream"),
        (name = "admin", description = "Configuration reload and persistence"),
        (name = "chat", description = "Group to server relay"),
    )
)]
/// OpenAPI document for the admin, chat, health and SSE routes.
pub struct ApiDoc;
