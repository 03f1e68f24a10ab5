use std::future::Future;

use tracing::{info, warn};
use validator::Validate;

use crate::{
    config::SeedData,
    dao::{
        game_store::{GameStore, TransactionError},
        models::{GameState, ParticipantStatus},
        storage::{StorageError, StorageResult},
    },
    dto::admin::HostActionRequest,
    error::ServiceError,
    services::{
        ranking_service,
        retry::{self, Failure, RetryPolicy},
    },
    state::{
        SharedState,
        state_machine::{self, GameEvent, HostAction, TransitionError},
    },
};

/// Validate and apply a host action, returning the committed snapshot.
///
/// Lookups and side effects the transition depends on (question existence,
/// rankings, revivals) are resolved first; the phase change itself is one
/// store transaction whose write function is [`state_machine::next_state`].
pub async fn apply_host_action(
    state: &SharedState,
    request: HostActionRequest,
) -> Result<GameState, ServiceError> {
    let action = request.action;
    let event = match action {
        HostAction::StartQuestion => {
            let question_id = request
                .question_id()
                .ok_or(TransitionError::MissingPayload {
                    field: "questionId",
                })?
                .to_owned();
            ensure_question_exists(state, &question_id).await?;
            GameEvent::StartQuestion { question_id }
        }
        HostAction::ArmGong => GameEvent::ArmGong,
        HostAction::TriggerGong => GameEvent::TriggerGong,
        HostAction::ShowDistribution => GameEvent::ShowDistribution,
        HostAction::ShowCorrectAnswer => GameEvent::ShowCorrectAnswer,
        HostAction::ShowResults => GameEvent::ShowResults(compute_results(state).await?),
        HostAction::ReviveAll => {
            revive_dropped(state).await?;
            GameEvent::ReviveAll
        }
        HostAction::PrepareNext => GameEvent::PrepareNext,
    };

    let next = transact(state, event).await?;
    info!(
        action = %action,
        phase = %next.phase,
        question_id = next.current_question_id.as_deref().unwrap_or("-"),
        last_update = next.last_update,
        "host action applied"
    );
    Ok(next)
}

/// Latest committed snapshot, `None` before the first host action.
pub async fn current_state(state: &SharedState) -> Result<Option<GameState>, ServiceError> {
    let store = state.store().clone();
    Ok(with_retry(state.config().ranking_retry(), || store.load_state()).await?)
}

async fn ensure_question_exists(state: &SharedState, question_id: &str) -> Result<(), ServiceError> {
    let store = state.store().clone();
    let found = with_retry(state.config().ranking_retry(), || {
        store.find_question(question_id.to_owned())
    })
    .await?;
    match found {
        Some(_) => Ok(()),
        None => Err(ServiceError::NotFound(format!(
            "question `{question_id}` not found"
        ))),
    }
}

/// Validate against the current snapshot before ranking so an illegal
/// ShowResults never eliminates anybody.
async fn compute_results(
    state: &SharedState,
) -> Result<ranking_service::RankingOutcome, ServiceError> {
    let current = current_state(state).await?;
    state_machine::validate(current.as_ref(), HostAction::ShowResults)?;

    let Some(snapshot) = current else {
        return Err(TransitionError::InvalidPhase {
            action: HostAction::ShowResults,
            required: HostAction::ShowResults.allowed_from().unwrap_or(&[]),
            current: None,
        }
        .into());
    };
    let Some(question_id) = snapshot.current_question_id.as_deref() else {
        return Err(TransitionError::MissingQuestion {
            phase: snapshot.phase,
        }
        .into());
    };

    let config = state.config();
    Ok(ranking_service::rank_and_eliminate(
        state.store().as_ref(),
        config.ranking_retry(),
        config.base_prize(),
        question_id,
        snapshot.period_final,
        snapshot.prize_carryover,
    )
    .await)
}

async fn revive_dropped(state: &SharedState) -> Result<(), ServiceError> {
    let store = state.store().clone();
    let policy = state.config().ranking_retry();

    let dropped = with_retry(policy, || {
        store.participants_with_status(ParticipantStatus::Dropped)
    })
    .await?;
    if dropped.is_empty() {
        return Ok(());
    }

    let ids: Vec<String> = dropped.into_iter().map(|participant| participant.id).collect();
    let revived = with_retry(policy, || {
        store.batch_update_participant_status(ids.clone(), ParticipantStatus::Active)
    })
    .await?;
    info!(revived, "dropped participants revived");
    Ok(())
}

async fn transact(state: &SharedState, event: GameEvent) -> Result<GameState, ServiceError> {
    let store = state.store().clone();
    let result = retry::execute(state.config().ranking_retry(), || {
        let event = event.clone();
        let pending = store.transact_state(Box::new(move |current| {
            state_machine::next_state(current, &event)
        }));
        async move { pending.await.map_err(classify_transaction) }
    })
    .await;
    Ok(result?)
}

fn classify_transaction(err: TransactionError) -> Failure<TransactionError> {
    match &err {
        TransactionError::Storage(storage) if storage.is_transient() => Failure::Transient(err),
        _ => Failure::Abort(err),
    }
}

fn classify_storage(err: StorageError) -> Failure<StorageError> {
    if err.is_transient() {
        Failure::Transient(err)
    } else {
        Failure::Abort(err)
    }
}

/// Run a store call under the retry policy; only transient kinds are retried.
async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> StorageResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    retry::execute(policy, || {
        let pending = operation();
        async move { pending.await.map_err(classify_storage) }
    })
    .await
}

/// Load configured questions and participants into the store.
///
/// Invalid questions are skipped with a warning; existing documents with the
/// same id are overwritten.
pub async fn load_seed(store: &dyn GameStore, seed: &SeedData) -> Result<(), ServiceError> {
    let mut questions = 0;
    for question in &seed.questions {
        if let Err(err) = question.validate() {
            warn!(question_id = %question.id, error = %err, "skipping invalid seed question");
            continue;
        }
        store.save_question(question.clone()).await?;
        questions += 1;
    }
    for participant in &seed.participants {
        store.save_participant(participant.clone()).await?;
    }
    info!(
        questions,
        participants = seed.participants.len(),
        "seed data loaded"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            game_store::{InMemoryGameStore, StoreOp},
            models::{Answer, Participant, Period, Question},
            storage::StorageErrorKind,
        },
        services::token_verifier::StaticTokenVerifier,
        state::{AppState, state_machine::GamePhase},
    };

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_factor: 2.0,
        }
    }

    fn question(id: &str) -> Question {
        Question {
            id: id.into(),
            period: Period::First,
            number: 1,
            text: "Largest planet?".into(),
            choices: vec!["Jupiter".into(), "Mars".into()],
            correct_choice: "Jupiter".into(),
            deadline_ms: u64::MAX,
            skip_attributes: vec![],
        }
    }

    fn participant(id: &str, status: ParticipantStatus) -> Participant {
        Participant {
            id: id.into(),
            display_name: id.to_uppercase(),
            status,
            tags: vec![],
        }
    }

    async fn setup() -> (InMemoryGameStore, SharedState) {
        let store = InMemoryGameStore::new();
        let seed = SeedData {
            questions: vec![question("q1"), question("q2")],
            participants: vec![
                participant("g1", ParticipantStatus::Active),
                participant("g2", ParticipantStatus::Active),
                participant("g3", ParticipantStatus::Active),
            ],
        };
        load_seed(&store, &seed).await.unwrap();
        let state = AppState::new(
            Arc::new(store.clone()),
            AppConfig::default().with_ranking_retry(fast_policy()),
            Arc::new(StaticTokenVerifier::default()),
        );
        (store, state)
    }

    async fn act(state: &SharedState, action: HostAction) -> Result<GameState, ServiceError> {
        apply_host_action(state, HostActionRequest::new(action)).await
    }

    async fn answer(store: &InMemoryGameStore, participant: &str, latency_ms: u32, correct: bool) {
        store
            .insert_answer(Answer {
                participant_id: participant.into(),
                question_id: "q1".into(),
                choice: if correct { "Jupiter" } else { "Mars" }.into(),
                latency_ms,
                is_correct: correct,
                created_at_ms: 0,
            })
            .await
            .unwrap();
    }

    async fn status_of(store: &InMemoryGameStore, id: &str) -> ParticipantStatus {
        store
            .find_participant(id.into())
            .await
            .unwrap()
            .unwrap()
            .status
    }

    #[tokio::test]
    async fn full_cycle_ranks_and_eliminates_slowest_correct() {
        let (store, state) = setup().await;
        let started = apply_host_action(&state, HostActionRequest::start_question("q1"))
            .await
            .unwrap();
        assert_eq!(started.phase, GamePhase::AcceptingAnswers);

        answer(&store, "g1", 500, true).await;
        answer(&store, "g2", 500, true).await;
        answer(&store, "g3", 900, true).await;

        act(&state, HostAction::ShowDistribution).await.unwrap();
        act(&state, HostAction::ShowCorrectAnswer).await.unwrap();
        let shown = act(&state, HostAction::ShowResults).await.unwrap();

        assert_eq!(shown.phase, GamePhase::ShowingResults);
        assert!(shown.last_update > started.last_update);
        let results = shown.results.unwrap();
        let top: Vec<_> = results
            .top10
            .iter()
            .map(|entry| entry.participant_id.as_str())
            .collect();
        assert_eq!(top, ["g1", "g2", "g3"]);
        assert_eq!(status_of(&store, "g3").await, ParticipantStatus::Dropped);
        assert_eq!(status_of(&store, "g1").await, ParticipantStatus::Active);
    }

    #[tokio::test]
    async fn all_incorrect_accumulates_the_base_prize() {
        let (store, state) = setup().await;
        apply_host_action(&state, HostActionRequest::start_question("q1"))
            .await
            .unwrap();
        answer(&store, "g1", 300, false).await;
        act(&state, HostAction::ShowDistribution).await.unwrap();
        act(&state, HostAction::ShowCorrectAnswer).await.unwrap();

        let shown = act(&state, HostAction::ShowResults).await.unwrap();
        assert_eq!(shown.phase, GamePhase::AllIncorrect);
        assert_eq!(shown.prize_carryover, state.config().base_prize());
    }

    #[tokio::test]
    async fn gong_question_crowns_period_champions() {
        let (store, state) = setup().await;
        apply_host_action(&state, HostActionRequest::start_question("q1"))
            .await
            .unwrap();
        let armed = act(&state, HostAction::ArmGong).await.unwrap();
        assert!(armed.is_gong_active && armed.period_final);
        let retriggered = act(&state, HostAction::TriggerGong).await.unwrap();
        assert!(retriggered.last_update > armed.last_update);

        answer(&store, "g1", 300, true).await;
        answer(&store, "g2", 300, true).await;
        answer(&store, "g3", 400, true).await;

        let distributed = act(&state, HostAction::ShowDistribution).await.unwrap();
        assert!(!distributed.is_gong_active);
        act(&state, HostAction::ShowCorrectAnswer).await.unwrap();
        let shown = act(&state, HostAction::ShowResults).await.unwrap();

        let results = shown.results.unwrap();
        assert_eq!(
            results.period_champions,
            Some(vec!["g1".to_string(), "g2".to_string()])
        );
        assert_eq!(results.period, Some(Period::First));
        assert!(!shown.is_gong_active && !shown.period_final);
    }

    #[tokio::test]
    async fn illegal_action_leaves_snapshot_unchanged() {
        let (store, state) = setup().await;
        let started = apply_host_action(&state, HostActionRequest::start_question("q1"))
            .await
            .unwrap();
        answer(&store, "g1", 100, true).await;

        for action in [
            HostAction::ShowCorrectAnswer,
            HostAction::ShowResults,
            HostAction::TriggerGong,
            HostAction::PrepareNext,
        ] {
            let err = act(&state, action).await.unwrap_err();
            assert!(matches!(err, ServiceError::InvalidState(_)), "{action}: {err}");
        }

        let after = store.load_state().await.unwrap().unwrap();
        assert_eq!(
            serde_json::to_vec(&after).unwrap(),
            serde_json::to_vec(&started).unwrap()
        );
        assert_eq!(status_of(&store, "g1").await, ParticipantStatus::Active);
    }

    #[tokio::test]
    async fn unknown_question_is_rejected_before_any_write() {
        let (store, state) = setup().await;
        let err = apply_host_action(&state, HostActionRequest::start_question("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        assert_eq!(store.load_state().await.unwrap(), None);
    }

    #[tokio::test]
    async fn start_question_requires_question_id() {
        let (_store, state) = setup().await;
        let err = act(&state, HostAction::StartQuestion).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn revive_all_without_dropped_still_changes_phase() {
        let (store, state) = setup().await;
        let revived = act(&state, HostAction::ReviveAll).await.unwrap();
        assert_eq!(revived.phase, GamePhase::AllRevived);
        for id in ["g1", "g2", "g3"] {
            assert_eq!(status_of(&store, id).await, ParticipantStatus::Active);
        }
    }

    #[tokio::test]
    async fn revive_all_reactivates_dropped_participants() {
        let (store, state) = setup().await;
        store
            .batch_update_participant_status(vec!["g2".into(), "g3".into()], ParticipantStatus::Dropped)
            .await
            .unwrap();

        act(&state, HostAction::ReviveAll).await.unwrap();
        assert_eq!(status_of(&store, "g2").await, ParticipantStatus::Active);
        assert_eq!(status_of(&store, "g3").await, ParticipantStatus::Active);
    }

    #[tokio::test]
    async fn contention_is_retried_and_permission_errors_are_not() {
        let (store, state) = setup().await;
        store.fail_next(StoreOp::TransactState, StorageErrorKind::Contention, 2);
        let started = apply_host_action(&state, HostActionRequest::start_question("q1")).await;
        assert!(started.is_ok());

        store.fail_next(StoreOp::TransactState, StorageErrorKind::PermissionDenied, 1);
        let err = act(&state, HostAction::ShowDistribution).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unavailable(_)));
        // A single attempt consumed the only injected failure.
        assert!(act(&state, HostAction::ShowDistribution).await.is_ok());
    }

    #[tokio::test]
    async fn ranking_outage_still_advances_to_results() {
        let (store, state) = setup().await;
        apply_host_action(&state, HostActionRequest::start_question("q1"))
            .await
            .unwrap();
        answer(&store, "g1", 100, true).await;
        act(&state, HostAction::ShowDistribution).await.unwrap();
        act(&state, HostAction::ShowCorrectAnswer).await.unwrap();

        store.fail_next(StoreOp::AnswersForQuestion, StorageErrorKind::Unavailable, 10);
        let shown = act(&state, HostAction::ShowResults).await.unwrap();
        assert_eq!(shown.phase, GamePhase::ShowingResults);
        let results = shown.results.unwrap();
        assert!(results.ranking_error);
        assert!(results.top10.is_empty() && results.worst10.is_empty());
    }

    #[tokio::test]
    async fn invalid_seed_questions_are_skipped() {
        let store = InMemoryGameStore::new();
        let mut broken = question("bad");
        broken.correct_choice = "Pluto".into();
        let seed = SeedData {
            questions: vec![question("q1"), broken],
            participants: vec![],
        };
        load_seed(&store, &seed).await.unwrap();
        assert!(store.find_question("q1".into()).await.unwrap().is_some());
        assert!(store.find_question("bad".into()).await.unwrap().is_none());
    }
}
