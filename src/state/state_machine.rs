use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::{dao::models::GameState, services::ranking_service::RankingOutcome};

/// Discrete stages of a single question's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GamePhase {
    /// Waiting for the host to open the next question.
    ReadyForNext,
    /// Question is open and participants may answer.
    AcceptingAnswers,
    /// Answer distribution is on screen.
    ShowingDistribution,
    /// Correct choice is revealed.
    ShowingCorrectAnswer,
    /// Rankings and eliminations are on screen.
    ShowingResults,
    /// Nobody answered correctly; the prize carries over.
    AllIncorrect,
    /// Every dropped participant was brought back.
    AllRevived,
}

impl GamePhase {
    /// Every phase, in lifecycle order.
    pub const ALL: [GamePhase; 7] = [
        GamePhase::ReadyForNext,
        GamePhase::AcceptingAnswers,
        GamePhase::ShowingDistribution,
        GamePhase::ShowingCorrectAnswer,
        GamePhase::ShowingResults,
        GamePhase::AllIncorrect,
        GamePhase::AllRevived,
    ];

    /// Wire name of the phase.
    pub fn as_str(self) -> &'static str {
        match self {
            GamePhase::ReadyForNext => "READY_FOR_NEXT",
            GamePhase::AcceptingAnswers => "ACCEPTING_ANSWERS",
            GamePhase::ShowingDistribution => "SHOWING_DISTRIBUTION",
            GamePhase::ShowingCorrectAnswer => "SHOWING_CORRECT_ANSWER",
            GamePhase::ShowingResults => "SHOWING_RESULTS",
            GamePhase::AllIncorrect => "ALL_INCORRECT",
            GamePhase::AllRevived => "ALL_REVIVED",
        }
    }

    /// Whether the phase refers to a current question.
    pub fn is_question_bound(self) -> bool {
        matches!(
            self,
            GamePhase::AcceptingAnswers
                | GamePhase::ShowingDistribution
                | GamePhase::ShowingCorrectAnswer
                | GamePhase::ShowingResults
                | GamePhase::AllIncorrect
        )
    }
}

impl fmt::Display for GamePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Actions the host can issue against the live game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostAction {
    /// Open the question named in the payload.
    StartQuestion,
    /// Mark the open question period-final and raise the gong cue.
    ArmGong,
    /// Raise the gong cue again.
    TriggerGong,
    /// Close answers and show the choice distribution.
    ShowDistribution,
    /// Reveal the correct choice.
    ShowCorrectAnswer,
    /// Compute and publish the rankings.
    ShowResults,
    /// Reactivate every dropped participant.
    ReviveAll,
    /// Clear the question and wait for the next one.
    PrepareNext,
}

impl HostAction {
    /// Wire name of the action.
    pub fn as_str(self) -> &'static str {
        match self {
            HostAction::StartQuestion => "START_QUESTION",
            HostAction::ArmGong => "ARM_GONG",
            HostAction::TriggerGong => "TRIGGER_GONG",
            HostAction::ShowDistribution => "SHOW_DISTRIBUTION",
            HostAction::ShowCorrectAnswer => "SHOW_CORRECT_ANSWER",
            HostAction::ShowResults => "SHOW_RESULTS",
            HostAction::ReviveAll => "REVIVE_ALL",
            HostAction::PrepareNext => "PREPARE_NEXT",
        }
    }

    /// Phases the action may be applied from. `None` means any phase,
    /// including no game at all.
    pub fn allowed_from(self) -> Option<&'static [GamePhase]> {
        match self {
            HostAction::StartQuestion | HostAction::ReviveAll => None,
            HostAction::ArmGong | HostAction::TriggerGong | HostAction::ShowDistribution => {
                Some(&[GamePhase::AcceptingAnswers])
            }
            HostAction::ShowCorrectAnswer => Some(&[GamePhase::ShowingDistribution]),
            HostAction::ShowResults => Some(&[GamePhase::ShowingCorrectAnswer]),
            HostAction::PrepareNext => Some(&[
                GamePhase::ShowingResults,
                GamePhase::AllIncorrect,
                GamePhase::AllRevived,
            ]),
        }
    }
}

impl fmt::Display for HostAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events applied to the live state, carrying whatever the transition needs
/// that was resolved before the transaction started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    /// Open a question that is known to exist.
    StartQuestion { question_id: String },
    /// Mark the open question as period-final and raise the gong cue.
    ArmGong,
    /// Raise the gong cue again on an already armed question.
    TriggerGong,
    /// Answers are closed; the gong cue is cleared.
    ShowDistribution,
    /// The correct choice is revealed.
    ShowCorrectAnswer,
    /// Publish rankings computed for the current question.
    ShowResults(RankingOutcome),
    /// Dropped participants were reactivated.
    ReviveAll,
    /// Leave the current question behind.
    PrepareNext,
}

impl GameEvent {
    /// Host action the event originates from.
    pub fn action(&self) -> HostAction {
        match self {
            GameEvent::StartQuestion { .. } => HostAction::StartQuestion,
            GameEvent::ArmGong => HostAction::ArmGong,
            GameEvent::TriggerGong => HostAction::TriggerGong,
            GameEvent::ShowDistribution => HostAction::ShowDistribution,
            GameEvent::ShowCorrectAnswer => HostAction::ShowCorrectAnswer,
            GameEvent::ShowResults(_) => HostAction::ShowResults,
            GameEvent::ReviveAll => HostAction::ReviveAll,
            GameEvent::PrepareNext => HostAction::PrepareNext,
        }
    }
}

/// Reasons a host action is refused. The snapshot is never modified.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// The action is not legal from the current phase.
    #[error("{action} requires phase {}, current phase is {}", join_phases(.required), describe(.current))]
    InvalidPhase {
        action: HostAction,
        required: &'static [GamePhase],
        current: Option<GamePhase>,
    },
    /// The gong must already be armed.
    #[error("{action} requires the gong to be active")]
    GongInactive { action: HostAction },
    /// The gong is already armed for this question.
    #[error("{action} cannot arm a gong that is already active")]
    GongAlreadyActive { action: HostAction },
    /// A payload field needed by the action is absent.
    #[error("missing required payload field `{field}`")]
    MissingPayload { field: &'static str },
    /// The stored document does not carry a field its phase requires.
    #[error("game state in phase {phase} has no current question")]
    MissingQuestion { phase: GamePhase },
    /// Results were computed for a question that is no longer current.
    #[error("results were computed for question `{computed}` but the current question is {}", .current.as_deref().unwrap_or("none"))]
    StaleResults {
        computed: String,
        current: Option<String>,
    },
}

fn join_phases(phases: &[GamePhase]) -> String {
    phases
        .iter()
        .map(|phase| phase.as_str())
        .collect::<Vec<_>>()
        .join(" or ")
}

fn describe(phase: &Option<GamePhase>) -> &'static str {
    phase.map(GamePhase::as_str).unwrap_or("NONE (no game yet)")
}

/// Check that `action` may be applied to `current` without computing the next state.
pub fn validate(current: Option<&GameState>, action: HostAction) -> Result<(), TransitionError> {
    let phase = current.map(|state| state.phase);
    if let Some(required) = action.allowed_from() {
        if !phase.is_some_and(|phase| required.contains(&phase)) {
            return Err(TransitionError::InvalidPhase {
                action,
                required,
                current: phase,
            });
        }
    }

    let gong_active = current.is_some_and(|state| state.is_gong_active);
    match action {
        HostAction::TriggerGong if !gong_active => Err(TransitionError::GongInactive { action }),
        HostAction::ArmGong if gong_active => Err(TransitionError::GongAlreadyActive { action }),
        HostAction::ShowResults => match current.and_then(|state| state.current_question_id.as_ref()) {
            Some(_) => Ok(()),
            None => Err(TransitionError::MissingQuestion {
                phase: GamePhase::ShowingCorrectAnswer,
            }),
        },
        _ => Ok(()),
    }
}

/// Compute the snapshot that follows `current` once `event` is applied.
///
/// Pure: the store may call it again with a fresher snapshot when an
/// optimistic write loses a race. `last_update` is copied through untouched;
/// the store stamps it on commit.
pub fn next_state(
    current: Option<&GameState>,
    event: &GameEvent,
) -> Result<GameState, TransitionError> {
    validate(current, event.action())?;

    let mut next = current
        .cloned()
        .unwrap_or_else(|| GameState::initial(GamePhase::ReadyForNext));

    match event {
        GameEvent::StartQuestion { question_id } => {
            next.phase = GamePhase::AcceptingAnswers;
            next.current_question_id = Some(question_id.clone());
            next.is_gong_active = false;
            next.period_final = false;
            next.results = None;
        }
        GameEvent::ArmGong => {
            next.is_gong_active = true;
            next.period_final = true;
        }
        GameEvent::TriggerGong => {}
        GameEvent::ShowDistribution => {
            next.phase = GamePhase::ShowingDistribution;
            next.is_gong_active = false;
        }
        GameEvent::ShowCorrectAnswer => {
            next.phase = GamePhase::ShowingCorrectAnswer;
        }
        GameEvent::ShowResults(outcome) => {
            if next.current_question_id.as_deref() != Some(outcome.question_id.as_str()) {
                return Err(TransitionError::StaleResults {
                    computed: outcome.question_id.clone(),
                    current: next.current_question_id.clone(),
                });
            }
            next.phase = outcome.phase;
            next.results = Some(outcome.results.clone());
            next.prize_carryover = outcome.prize_carryover;
            next.is_gong_active = false;
            next.period_final = false;
        }
        GameEvent::ReviveAll => {
            next.phase = GamePhase::AllRevived;
            next.current_question_id = None;
            next.is_gong_active = false;
            next.period_final = false;
        }
        GameEvent::PrepareNext => {
            next.phase = GamePhase::ReadyForNext;
            next.current_question_id = None;
            next.is_gong_active = false;
            next.period_final = false;
        }
    }

    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::{GameResults, RankedAnswer};

    fn apply(state: Option<&GameState>, event: GameEvent) -> GameState {
        next_state(state, &event).unwrap()
    }

    fn state_in(phase: GamePhase) -> GameState {
        GameState {
            phase,
            current_question_id: phase.is_question_bound().then(|| "q1".to_string()),
            is_gong_active: false,
            period_final: false,
            results: None,
            prize_carryover: 500,
            last_update: 42,
        }
    }

    fn outcome(question_id: &str, phase: GamePhase, carryover: u64) -> RankingOutcome {
        RankingOutcome {
            question_id: question_id.into(),
            results: GameResults::ranked(
                vec![RankedAnswer {
                    participant_id: "p1".into(),
                    latency_ms: 100,
                }],
                vec![],
                None,
            ),
            phase,
            prize_carryover: carryover,
            eliminated: vec![],
        }
    }

    fn sample_event(action: HostAction) -> GameEvent {
        match action {
            HostAction::StartQuestion => GameEvent::StartQuestion {
                question_id: "q2".into(),
            },
            HostAction::ArmGong => GameEvent::ArmGong,
            HostAction::TriggerGong => GameEvent::TriggerGong,
            HostAction::ShowDistribution => GameEvent::ShowDistribution,
            HostAction::ShowCorrectAnswer => GameEvent::ShowCorrectAnswer,
            HostAction::ShowResults => {
                GameEvent::ShowResults(outcome("q1", GamePhase::ShowingResults, 0))
            }
            HostAction::ReviveAll => GameEvent::ReviveAll,
            HostAction::PrepareNext => GameEvent::PrepareNext,
        }
    }

    #[test]
    fn full_question_cycle() {
        let state = apply(
            None,
            GameEvent::StartQuestion {
                question_id: "q1".into(),
            },
        );
        assert_eq!(state.phase, GamePhase::AcceptingAnswers);
        assert_eq!(state.current_question_id.as_deref(), Some("q1"));

        let state = apply(Some(&state), GameEvent::ShowDistribution);
        assert_eq!(state.phase, GamePhase::ShowingDistribution);

        let state = apply(Some(&state), GameEvent::ShowCorrectAnswer);
        assert_eq!(state.phase, GamePhase::ShowingCorrectAnswer);

        let state = apply(
            Some(&state),
            GameEvent::ShowResults(outcome("q1", GamePhase::ShowingResults, 0)),
        );
        assert_eq!(state.phase, GamePhase::ShowingResults);
        assert!(state.results.is_some());

        let state = apply(Some(&state), GameEvent::PrepareNext);
        assert_eq!(state.phase, GamePhase::ReadyForNext);
        assert_eq!(state.current_question_id, None);
        assert!(state.results.is_some());
    }

    #[test]
    fn illegal_actions_are_rejected_from_every_other_phase() {
        let actions = [
            HostAction::ArmGong,
            HostAction::TriggerGong,
            HostAction::ShowDistribution,
            HostAction::ShowCorrectAnswer,
            HostAction::ShowResults,
            HostAction::PrepareNext,
        ];
        for action in actions {
            let required = action.allowed_from().unwrap();
            for phase in GamePhase::ALL {
                if required.contains(&phase) {
                    continue;
                }
                let state = state_in(phase);
                let err = next_state(Some(&state), &sample_event(action)).unwrap_err();
                assert_eq!(
                    err,
                    TransitionError::InvalidPhase {
                        action,
                        required,
                        current: Some(phase),
                    },
                    "{action} from {phase}"
                );
                assert!(err.to_string().contains(required[0].as_str()));
            }
            assert!(matches!(
                next_state(None, &sample_event(action)),
                Err(TransitionError::InvalidPhase { current: None, .. })
            ));
        }
    }

    #[test]
    fn start_question_and_revive_are_legal_from_anywhere() {
        for phase in GamePhase::ALL {
            let state = state_in(phase);
            let started = apply(
                Some(&state),
                GameEvent::StartQuestion {
                    question_id: "q9".into(),
                },
            );
            assert_eq!(started.phase, GamePhase::AcceptingAnswers);
            assert_eq!(started.prize_carryover, 500);

            let revived = apply(Some(&state), GameEvent::ReviveAll);
            assert_eq!(revived.phase, GamePhase::AllRevived);
            assert_eq!(revived.current_question_id, None);
        }
        assert_eq!(apply(None, GameEvent::ReviveAll).phase, GamePhase::AllRevived);
    }

    #[test]
    fn start_question_clears_previous_results_and_gong() {
        let mut state = state_in(GamePhase::ShowingResults);
        state.results = Some(GameResults::ranking_failed());
        state.is_gong_active = true;
        state.period_final = true;

        let next = apply(
            Some(&state),
            GameEvent::StartQuestion {
                question_id: "q2".into(),
            },
        );
        assert_eq!(next.results, None);
        assert!(!next.is_gong_active);
        assert!(!next.period_final);
    }

    #[test]
    fn trigger_gong_requires_armed_gong() {
        let state = state_in(GamePhase::AcceptingAnswers);
        assert_eq!(
            next_state(Some(&state), &GameEvent::TriggerGong).unwrap_err(),
            TransitionError::GongInactive {
                action: HostAction::TriggerGong
            }
        );

        let armed = apply(Some(&state), GameEvent::ArmGong);
        assert!(armed.is_gong_active);
        assert!(armed.period_final);

        let rearmed = apply(Some(&armed), GameEvent::TriggerGong);
        assert_eq!(rearmed, armed);

        assert_eq!(
            next_state(Some(&armed), &GameEvent::ArmGong).unwrap_err(),
            TransitionError::GongAlreadyActive {
                action: HostAction::ArmGong
            }
        );
    }

    #[test]
    fn distribution_clears_gong_cue_but_keeps_period_final() {
        let mut state = state_in(GamePhase::AcceptingAnswers);
        state = apply(Some(&state), GameEvent::ArmGong);
        let next = apply(Some(&state), GameEvent::ShowDistribution);
        assert!(!next.is_gong_active);
        assert!(next.period_final);
    }

    #[test]
    fn results_apply_outcome_and_clear_gong_flags() {
        let mut state = state_in(GamePhase::ShowingCorrectAnswer);
        state.period_final = true;
        let next = apply(
            Some(&state),
            GameEvent::ShowResults(outcome("q1", GamePhase::AllIncorrect, 1500)),
        );
        assert_eq!(next.phase, GamePhase::AllIncorrect);
        assert_eq!(next.prize_carryover, 1500);
        assert!(!next.period_final);
        assert_eq!(next.last_update, state.last_update);
    }

    #[test]
    fn results_for_another_question_are_stale() {
        let state = state_in(GamePhase::ShowingCorrectAnswer);
        let err = next_state(
            Some(&state),
            &GameEvent::ShowResults(outcome("q7", GamePhase::ShowingResults, 0)),
        )
        .unwrap_err();
        assert!(matches!(err, TransitionError::StaleResults { .. }));
    }
}
