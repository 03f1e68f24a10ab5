use serde::{Deserialize, Serialize};

use crate::state::state_machine::GamePhase;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Event pushed to every admitted audience connection after a state change.
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum AudienceEvent {
    /// No game exists yet.
    IdleState {},
    /// The gong cue of the current question.
    GongActivated {},
    /// A question opened. `server_start_time` is stamped at mapping time.
    StartQuestion {
        question_id: String,
        server_start_time: u64,
    },
    /// Any other phase change.
    PhaseChanged { new_phase: GamePhase },
}

impl AudienceEvent {
    /// Wire name of the event, used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            AudienceEvent::IdleState {} => "IdleState",
            AudienceEvent::GongActivated {} => "GongActivated",
            AudienceEvent::StartQuestion { .. } => "StartQuestion",
            AudienceEvent::PhaseChanged { .. } => "PhaseChanged",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Handshake messages sent to a single connection.
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ConnectionMessage {
    /// Sent on connect; authenticate within `timeout_ms`.
    AuthRequired { timeout_ms: u64 },
    /// Token accepted; broadcasts follow.
    AuthSuccess { subject_id: String },
    /// Token refused; the connection is closed next.
    AuthFailed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Messages accepted from audience clients.
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    /// Present the participant token.
    Authenticate { token: String },
}

/// Transport-neutral inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// Text payload.
    Text(String),
    /// Peer closed, or the stream ended.
    Close,
}

/// Transport-neutral outbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    /// Serialized message.
    Text(String),
    /// Close the connection, optionally explaining why.
    Close(Option<String>),
}
