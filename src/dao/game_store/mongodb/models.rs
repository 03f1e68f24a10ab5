use mongodb::bson::{Document, doc};
use serde::{Deserialize, Serialize};

use super::error::{MongoDaoError, MongoResult};
use crate::{
    dao::models::{
        Answer, GameResults, GameState, Participant, ParticipantStatus, Period, Question,
    },
    state::state_machine::GamePhase,
};

pub(super) const STATE_COLLECTION: &str = "game_state";
pub(super) const QUESTION_COLLECTION: &str = "questions";
pub(super) const ANSWER_COLLECTION: &str = "answers";
pub(super) const PARTICIPANT_COLLECTION: &str = "participants";

/// `_id` of the singleton live state document.
pub(super) const LIVE_STATE_ID: &str = "live";

pub(super) fn signed(value: u64, collection: &'static str, field: &str) -> MongoResult<i64> {
    i64::try_from(value).map_err(|_| MongoDaoError::Schema {
        collection,
        message: format!("`{field}` value {value} does not fit a BSON int64"),
    })
}

fn unsigned<T: TryFrom<i64>>(value: i64, collection: &'static str, field: &str) -> MongoResult<T> {
    T::try_from(value).map_err(|_| MongoDaoError::Schema {
        collection,
        message: format!("`{field}` holds out-of-range value {value}"),
    })
}

/// Status label stored in participant documents.
pub(super) fn status_label(status: ParticipantStatus) -> &'static str {
    match status {
        ParticipantStatus::Active => "ACTIVE",
        ParticipantStatus::Dropped => "DROPPED",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct MongoStateDocument {
    #[serde(rename = "_id")]
    id: String,
    phase: GamePhase,
    #[serde(default)]
    current_question_id: Option<String>,
    #[serde(default)]
    is_gong_active: bool,
    #[serde(default)]
    period_final: bool,
    #[serde(default)]
    results: Option<GameResults>,
    #[serde(default)]
    prize_carryover: i64,
    last_update: i64,
}

impl MongoStateDocument {
    pub(super) fn from_state(state: &GameState) -> MongoResult<Self> {
        Ok(Self {
            id: LIVE_STATE_ID.to_owned(),
            phase: state.phase,
            current_question_id: state.current_question_id.clone(),
            is_gong_active: state.is_gong_active,
            period_final: state.period_final,
            results: state.results.clone(),
            prize_carryover: signed(state.prize_carryover, STATE_COLLECTION, "prizeCarryover")?,
            last_update: signed(state.last_update, STATE_COLLECTION, "lastUpdate")?,
        })
    }
}

impl TryFrom<MongoStateDocument> for GameState {
    type Error = MongoDaoError;

    fn try_from(value: MongoStateDocument) -> MongoResult<Self> {
        Ok(Self {
            phase: value.phase,
            current_question_id: value.current_question_id,
            is_gong_active: value.is_gong_active,
            period_final: value.period_final,
            results: value.results,
            prize_carryover: unsigned(value.prize_carryover, STATE_COLLECTION, "prizeCarryover")?,
            last_update: unsigned(value.last_update, STATE_COLLECTION, "lastUpdate")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct MongoQuestionDocument {
    #[serde(rename = "_id")]
    id: String,
    period: Period,
    number: i64,
    text: String,
    choices: Vec<String>,
    correct_choice: String,
    deadline_ms: i64,
    #[serde(default)]
    skip_attributes: Vec<String>,
}

impl TryFrom<Question> for MongoQuestionDocument {
    type Error = MongoDaoError;

    fn try_from(value: Question) -> MongoResult<Self> {
        Ok(Self {
            id: value.id,
            period: value.period,
            number: i64::from(value.number),
            text: value.text,
            choices: value.choices,
            correct_choice: value.correct_choice,
            deadline_ms: signed(value.deadline_ms, QUESTION_COLLECTION, "deadlineMs")?,
            skip_attributes: value.skip_attributes,
        })
    }
}

impl TryFrom<MongoQuestionDocument> for Question {
    type Error = MongoDaoError;

    fn try_from(value: MongoQuestionDocument) -> MongoResult<Self> {
        Ok(Self {
            id: value.id,
            period: value.period,
            number: unsigned(value.number, QUESTION_COLLECTION, "number")?,
            text: value.text,
            choices: value.choices,
            correct_choice: value.correct_choice,
            deadline_ms: unsigned(value.deadline_ms, QUESTION_COLLECTION, "deadlineMs")?,
            skip_attributes: value.skip_attributes,
        })
    }
}

/// Sort giving answers in arrival order. `_id` only breaks ties between
/// answers accepted in the same millisecond.
pub(super) fn answer_arrival_order() -> Document {
    doc! { "createdAtMs": 1, "_id": 1 }
}

/// Answer row; `createdAtMs` carries the acceptance time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct MongoAnswerDocument {
    participant_id: String,
    question_id: String,
    choice: String,
    latency_ms: i64,
    is_correct: bool,
    created_at_ms: i64,
}

impl TryFrom<Answer> for MongoAnswerDocument {
    type Error = MongoDaoError;

    fn try_from(value: Answer) -> MongoResult<Self> {
        Ok(Self {
            participant_id: value.participant_id,
            question_id: value.question_id,
            choice: value.choice,
            latency_ms: i64::from(value.latency_ms),
            is_correct: value.is_correct,
            created_at_ms: signed(value.created_at_ms, ANSWER_COLLECTION, "createdAtMs")?,
        })
    }
}

impl TryFrom<MongoAnswerDocument> for Answer {
    type Error = MongoDaoError;

    fn try_from(value: MongoAnswerDocument) -> MongoResult<Self> {
        Ok(Self {
            participant_id: value.participant_id,
            question_id: value.question_id,
            choice: value.choice,
            latency_ms: unsigned(value.latency_ms, ANSWER_COLLECTION, "latencyMs")?,
            is_correct: value.is_correct,
            created_at_ms: unsigned(value.created_at_ms, ANSWER_COLLECTION, "createdAtMs")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct MongoParticipantDocument {
    #[serde(rename = "_id")]
    id: String,
    display_name: String,
    status: ParticipantStatus,
    #[serde(default)]
    tags: Vec<String>,
}

impl From<Participant> for MongoParticipantDocument {
    fn from(value: Participant) -> Self {
        Self {
            id: value.id,
            display_name: value.display_name,
            status: value.status,
            tags: value.tags,
        }
    }
}

impl From<MongoParticipantDocument> for Participant {
    fn from(value: MongoParticipantDocument) -> Self {
        Self {
            id: value.id,
            display_name: value.display_name,
            status: value.status,
            tags: value.tags,
        }
    }
}
