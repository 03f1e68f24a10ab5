//! Snapshot to audience event mapping.

use thiserror::Error;

use crate::{
    dao::models::{GameState, now_millis},
    dto::ws::AudienceEvent,
    state::state_machine::GamePhase,
};

/// Snapshot that cannot be mapped without inventing data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MapError {
    #[error("snapshot {last_update} is accepting answers without a current question id")]
    MissingQuestionId { last_update: u64 },
}

/// Map a snapshot to exactly one audience event, stamping the start time now.
pub fn map_snapshot(snapshot: Option<&GameState>) -> Result<AudienceEvent, MapError> {
    map_snapshot_at(snapshot, now_millis())
}

/// Map a snapshot to exactly one audience event.
///
/// First match wins: no snapshot is idle, an active gong masks everything
/// else, an open question starts at `now_ms`, any other phase is a plain
/// phase change.
pub fn map_snapshot_at(
    snapshot: Option<&GameState>,
    now_ms: u64,
) -> Result<AudienceEvent, MapError> {
    let Some(snapshot) = snapshot else {
        return Ok(AudienceEvent::IdleState {});
    };

    if snapshot.is_gong_active {
        return Ok(AudienceEvent::GongActivated {});
    }

    if snapshot.phase == GamePhase::AcceptingAnswers {
        let question_id = snapshot
            .current_question_id
            .clone()
            .ok_or(MapError::MissingQuestionId {
                last_update: snapshot.last_update,
            })?;
        return Ok(AudienceEvent::StartQuestion {
            question_id,
            server_start_time: now_ms,
        });
    }

    Ok(AudienceEvent::PhaseChanged {
        new_phase: snapshot.phase,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(phase: GamePhase, question: Option<&str>, gong: bool) -> GameState {
        let mut state = GameState::initial(phase);
        state.current_question_id = question.map(str::to_owned);
        state.is_gong_active = gong;
        state.last_update = 77;
        state
    }

    #[test]
    fn absent_snapshot_is_idle() {
        assert_eq!(map_snapshot_at(None, 1), Ok(AudienceEvent::IdleState {}));
    }

    #[test]
    fn gong_takes_priority_over_open_question() {
        let state = snapshot(GamePhase::AcceptingAnswers, Some("q1"), true);
        assert_eq!(
            map_snapshot_at(Some(&state), 1),
            Ok(AudienceEvent::GongActivated {})
        );
    }

    #[test]
    fn open_question_is_stamped_at_mapping_time() {
        let state = snapshot(GamePhase::AcceptingAnswers, Some("q1"), false);
        assert_eq!(
            map_snapshot_at(Some(&state), 1_234),
            Ok(AudienceEvent::StartQuestion {
                question_id: "q1".into(),
                server_start_time: 1_234,
            })
        );

        let before = now_millis();
        let Ok(AudienceEvent::StartQuestion {
            server_start_time, ..
        }) = map_snapshot(Some(&state))
        else {
            panic!("expected StartQuestion");
        };
        assert!(server_start_time >= before);
    }

    #[test]
    fn open_question_without_id_is_an_integrity_error() {
        let state = snapshot(GamePhase::AcceptingAnswers, None, false);
        assert_eq!(
            map_snapshot_at(Some(&state), 1),
            Err(MapError::MissingQuestionId { last_update: 77 })
        );
    }

    #[test]
    fn other_phases_map_to_phase_changed() {
        for phase in GamePhase::ALL
            .into_iter()
            .filter(|phase| *phase != GamePhase::AcceptingAnswers)
        {
            let state = snapshot(phase, phase.is_question_bound().then_some("q1"), false);
            assert_eq!(
                map_snapshot_at(Some(&state), 1),
                Ok(AudienceEvent::PhaseChanged { new_phase: phase })
            );
        }
    }
}
