use std::time::SystemTime;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Admin route payloads.
pub mod admin;
/// Chat route payloads.
pub mod chat;
/// Health and status payloads.
pub mod health;
/// SSE payloads.
pub mod sse;
/// Field validators.
pub mod validation;
/// Game-server event frames.
pub mod ws;

pub(crate) fn format_system_time(time: SystemTime) -> String {
    OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}
