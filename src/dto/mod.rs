use std::time::SystemTime;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Host REST API payloads.
pub mod admin;
/// Answer submission payloads.
pub mod answer;
/// Health check payloads.
pub mod health;
/// Audience WebSocket frames and events.
pub mod ws;

fn format_system_time(time: SystemTime) -> String {
    OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}
