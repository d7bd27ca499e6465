use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dto::admin::CacheStatus;

/// Simple health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
}

impl HealthResponse {
    /// Create a health response indicating the bridge is operational.
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }

    /// Create a health response indicating the ingress listener is down.
    pub fn degraded() -> Self {
        Self {
            status: "degraded".to_string(),
        }
    }
}

/// Remote-console links grouped by phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct PoolStats {
    /// Authenticated links.
    pub connected: usize,
    /// Links mid-handshake.
    pub connecting: usize,
    /// Entries without a live link.
    pub disconnected: usize,
}

/// One live game-server event session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct SessionSummary {
    /// Session id.
    pub id: Uuid,
    /// Normalized server name.
    pub name: String,
    /// RFC 3339 time the session opened.
    pub connected_at: String,
}

/// Detailed runtime view returned by `/status`.
#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    /// Address the ingress listener is bound to, when running.
    pub ingress_addr: Option<String>,
    /// Sessions ordered by connection time.
    pub sessions: Vec<SessionSummary>,
    /// Remote-console link counts.
    pub pool: PoolStats,
    /// Configured servers.
    pub servers: usize,
    /// Configured groups.
    pub groups: usize,
    /// Banned words in effect.
    pub banned_words: usize,
    /// Indexed player records.
    pub players: usize,
    /// Connected delivery stream subscribers.
    pub subscribers: usize,
    /// Write-behind queue state.
    pub cache: CacheStatus,
}
