use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::dto::format_system_time;

/// Upper bound of an answer's reported latency.
pub const MAX_LATENCY_MS: u32 = 300_000;

/// Answer submitted by an authenticated participant.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswerRequest {
    /// Question being answered.
    #[validate(length(min = 1, max = 128))]
    pub question_id: String,
    /// Chosen option, matched exactly against the question's choices.
    #[validate(length(min = 1, max = 256))]
    pub choice: String,
    /// Time the participant took to answer, in milliseconds.
    #[validate(range(max = 300_000))]
    pub latency_ms: u32,
}

/// Acknowledgement of a stored answer. Correctness is revealed later by the game.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnswerReceipt {
    /// Participant resolved from the bearer token.
    pub participant_id: String,
    /// Question being answered.
    pub question_id: String,
    /// Chosen option, matched exactly against the question's choices.
    pub choice: String,
    /// Time the participant took to answer, in milliseconds.
    pub latency_ms: u32,
    /// RFC 3339 timestamp of acceptance.
    pub accepted_at: String,
}

impl AnswerReceipt {
    /// Receipt for `request` accepted at `accepted_at`.
    pub fn new(
        participant_id: String,
        request: SubmitAnswerRequest,
        accepted_at: SystemTime,
    ) -> Self {
        Self {
            participant_id,
            question_id: request.question_id,
            choice: request.choice,
            latency_ms: request.latency_ms,
            accepted_at: format_system_time(accepted_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_above_five_minutes_is_rejected() {
        let mut request = SubmitAnswerRequest {
            question_id: "q1".into(),
            choice: "A".into(),
            latency_ms: MAX_LATENCY_MS,
        };
        assert!(request.validate().is_ok());
        request.latency_ms = MAX_LATENCY_MS + 1;
        assert!(request.validate().is_err());
    }
}
