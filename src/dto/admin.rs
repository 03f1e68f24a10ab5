//! DTO definitions used by the host REST API and documentation layer.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{dao::models::GameState, state::state_machine::HostAction};

/// Host action request: `{action, payload?: {questionId?}}`.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct HostActionRequest {
    /// Action to apply.
    pub action: HostAction,
    /// Arguments; `StartQuestion` needs `questionId`.
    #[serde(default)]
    #[validate(nested)]
    pub payload: Option<HostActionPayload>,
}

impl HostActionRequest {
    /// Request without payload.
    pub fn new(action: HostAction) -> Self {
        Self {
            action,
            payload: None,
        }
    }

    /// `StartQuestion` request for `question_id`.
    pub fn start_question(question_id: impl Into<String>) -> Self {
        Self {
            action: HostAction::StartQuestion,
            payload: Some(HostActionPayload {
                question_id: Some(question_id.into()),
            }),
        }
    }

    /// Question id from the payload, ignoring blank values.
    pub fn question_id(&self) -> Option<&str> {
        self.payload
            .as_ref()
            .and_then(|payload| payload.question_id.as_deref())
            .filter(|id| !id.trim().is_empty())
    }
}

/// Optional arguments of a host action.
#[derive(Debug, Clone, Default, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct HostActionPayload {
    /// Question to open.
    #[validate(length(min = 1, max = 128))]
    pub question_id: Option<String>,
}

/// Current game state as seen by the host; `state` is null before the first action.
#[derive(Debug, Serialize, ToSchema)]
pub struct GameStateResponse {
    /// Live state, if any.
    pub state: Option<GameState>,
}
