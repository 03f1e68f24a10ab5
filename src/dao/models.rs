use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::state::state_machine::GamePhase;

/// Singleton document holding the live game, mutated only inside store transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GameState {
    /// Current stage of the question lifecycle.
    pub phase: GamePhase,
    /// Question the phase refers to; set iff the phase is question-bound.
    #[serde(default)]
    pub current_question_id: Option<String>,
    /// Audience-facing gong cue for the current question.
    #[serde(default)]
    pub is_gong_active: bool,
    /// The current question was armed as period-final. Survives the gong cue
    /// being cleared at distribution so ranking can apply the gong policy.
    #[serde(default)]
    pub period_final: bool,
    /// Rankings of the last results-computing transition.
    #[serde(default)]
    pub results: Option<GameResults>,
    /// Prize accumulated across consecutive all-incorrect questions.
    #[serde(default)]
    pub prize_carryover: u64,
    /// Store-assigned write timestamp (epoch milliseconds), strictly increasing.
    pub last_update: u64,
}

impl GameState {
    /// Fresh state used when the first transition creates the document.
    pub fn initial(phase: GamePhase) -> Self {
        Self {
            phase,
            current_question_id: None,
            is_gong_active: false,
            period_final: false,
            results: None,
            prize_carryover: 0,
            last_update: 0,
        }
    }
}

/// Named segment of the game used to group period champions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    /// First half.
    First,
    /// Second half.
    Second,
    /// Tie-break questions.
    Overtime,
}

/// Participant lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantStatus {
    /// May submit answers.
    Active,
    /// Eliminated until revived.
    Dropped,
}

/// Question definition, immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Question {
    /// Stable identifier.
    pub id: String,
    /// Period the question belongs to.
    pub period: Period,
    /// Ordinal number inside the period.
    pub number: u32,
    /// Question wording shown to the audience.
    pub text: String,
    /// Ordered choices (2 to 10 entries).
    pub choices: Vec<String>,
    /// Member of `choices` that scores.
    pub correct_choice: String,
    /// Answers are refused after this instant (epoch milliseconds).
    pub deadline_ms: u64,
    /// Presentation-only tags, ignored by the game core.
    #[serde(default)]
    pub skip_attributes: Vec<String>,
}

impl Validate for Question {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.id.trim().is_empty() {
            let mut err = ValidationError::new("question_id_empty");
            err.message = Some("Question ID must not be empty".into());
            errors.add("id", err);
        }

        if !(2..=10).contains(&self.choices.len()) {
            let mut err = ValidationError::new("choices_length");
            err.message = Some(
                format!(
                    "A question needs between 2 and 10 choices (got {})",
                    self.choices.len()
                )
                .into(),
            );
            errors.add("choices", err);
        }

        if !self.choices.contains(&self.correct_choice) {
            let mut err = ValidationError::new("correct_choice_unknown");
            err.message = Some("Correct choice must be one of the listed choices".into());
            errors.add("correct_choice", err);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// One participant's answer to one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Answer {
    /// Participant who answered.
    pub participant_id: String,
    /// Question answered.
    pub question_id: String,
    /// Choice picked, one of the question's choices.
    pub choice: String,
    /// Time the participant took to answer, in milliseconds.
    pub latency_ms: u32,
    /// Derived server-side from the question's correct choice.
    pub is_correct: bool,
    /// Acceptance time (epoch milliseconds).
    pub created_at_ms: u64,
}

/// Player registered for the game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Participant {
    /// Stable identifier.
    pub id: String,
    /// Name shown in rankings.
    pub display_name: String,
    /// Whether the participant can still answer.
    pub status: ParticipantStatus,
    /// Free-form labels carried through from the seed.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Entry of a ranked answer list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RankedAnswer {
    /// Participant who answered.
    pub participant_id: String,
    /// Answer latency in milliseconds.
    pub latency_ms: u32,
}

impl From<&Answer> for RankedAnswer {
    fn from(answer: &Answer) -> Self {
        Self {
            participant_id: answer.participant_id.clone(),
            latency_ms: answer.latency_ms,
        }
    }
}

/// Rankings computed when results are shown.
///
/// Use [`GameResults::ranked`] or [`GameResults::ranking_failed`] so that a
/// ranking error always comes with empty lists and champions always carry
/// their period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GameResults {
    /// Fastest correct answers, ascending by latency.
    pub top10: Vec<RankedAnswer>,
    /// Slowest correct answers, descending by latency.
    pub worst10: Vec<RankedAnswer>,
    /// Top participants of the period, set on period-final questions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_champions: Option<Vec<String>>,
    /// Period the champions belong to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<Period>,
    /// Ranking could not be computed; the lists are then empty.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ranking_error: bool,
}

impl GameResults {
    /// Successful ranking, optionally crowning period champions.
    pub fn ranked(
        top10: Vec<RankedAnswer>,
        worst10: Vec<RankedAnswer>,
        champions: Option<(Vec<String>, Period)>,
    ) -> Self {
        let (period_champions, period) = match champions {
            Some((ids, period)) => (Some(ids), Some(period)),
            None => (None, None),
        };
        Self {
            top10,
            worst10,
            period_champions,
            period,
            ranking_error: false,
        }
    }

    /// Placeholder results recorded when ranking could not be computed.
    pub fn ranking_failed() -> Self {
        Self {
            top10: Vec::new(),
            worst10: Vec::new(),
            period_champions: None,
            period: None,
            ranking_error: true,
        }
    }
}

/// Convert a wall-clock instant into epoch milliseconds.
pub fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> u64 {
    epoch_millis(SystemTime::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question() -> Question {
        Question {
            id: "q1".into(),
            period: Period::First,
            number: 1,
            text: "Capital of France?".into(),
            choices: vec!["Paris".into(), "Lyon".into()],
            correct_choice: "Paris".into(),
            deadline_ms: 0,
            skip_attributes: vec![],
        }
    }

    #[test]
    fn question_with_valid_choices_passes() {
        assert!(question().validate().is_ok());
    }

    #[test]
    fn question_rejects_single_choice_and_unknown_answer() {
        let mut q = question();
        q.choices = vec!["Paris".into()];
        q.correct_choice = "Rome".into();
        let errors = q.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("choices"));
        assert!(fields.contains_key("correct_choice"));
    }

    #[test]
    fn game_state_rejects_unknown_fields() {
        let json = r#"{"phase":"READY_FOR_NEXT","lastUpdate":1,"gong":true}"#;
        assert!(serde_json::from_str::<GameState>(json).is_err());
    }

    #[test]
    fn failed_ranking_serializes_flag_and_empty_lists() {
        let value = serde_json::to_value(GameResults::ranking_failed()).unwrap();
        assert_eq!(value["rankingError"], true);
        assert_eq!(value["top10"].as_array().unwrap().len(), 0);
        assert_eq!(value["worst10"].as_array().unwrap().len(), 0);
        assert!(value.get("period").is_none());
    }
}
