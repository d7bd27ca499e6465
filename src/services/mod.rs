/// Reload and flush operations behind the admin routes.
pub mod admin_service;
/// Banned-word masking of relayed text.
pub mod banned_words;
/// Outbound delivery of group messages.
pub mod chat_sink;
/// Command, chat and binding operations behind the chat routes.
pub mod chat_service;
/// Owner of the effective configuration snapshot.
pub mod config_store;
/// Remote-console connection pool.
pub mod console_pool;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Player identity index.
pub mod identity;
/// Game-server event sessions and their listener.
pub mod ingress;
/// Event → group routing and fan-out.
pub mod notifier;
/// Write-behind file cache.
pub mod persistence;
/// Configuration diff and live reconciliation.
pub mod reconciler;
/// Group → server relay.
pub mod relay;
/// Server-Sent Events broadcasting service.
pub mod sse_service;
