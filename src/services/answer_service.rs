use std::time::SystemTime;

use tracing::info;

use crate::{
    dao::models::{Answer, ParticipantStatus, epoch_millis},
    dto::answer::{AnswerReceipt, MAX_LATENCY_MS, SubmitAnswerRequest},
    error::ServiceError,
    state::{SharedState, state_machine::GamePhase},
};

/// Verify the bearer token and record the participant's answer.
pub async fn submit_answer_with_token(
    state: &SharedState,
    token: &str,
    request: SubmitAnswerRequest,
) -> Result<AnswerReceipt, ServiceError> {
    let verified = state.verifier().verify(token).await?;
    submit_answer(state, verified.subject_id, request).await
}

/// Record an answer for `participant_id`.
///
/// The answer is accepted only while its question is open, from an active
/// participant, before the deadline, with a listed choice. Correctness is
/// derived here; a second answer to the same question is refused by the store.
pub async fn submit_answer(
    state: &SharedState,
    participant_id: String,
    request: SubmitAnswerRequest,
) -> Result<AnswerReceipt, ServiceError> {
    if request.latency_ms > MAX_LATENCY_MS {
        return Err(ServiceError::InvalidInput(format!(
            "latency must be at most {MAX_LATENCY_MS} ms"
        )));
    }

    let store = state.store();
    let current = store.load_state().await?;
    let open = current.as_ref().is_some_and(|snapshot| {
        snapshot.phase == GamePhase::AcceptingAnswers
            && snapshot.current_question_id.as_deref() == Some(request.question_id.as_str())
    });
    if !open {
        return Err(ServiceError::InvalidState(format!(
            "question `{}` is not accepting answers",
            request.question_id
        )));
    }

    let participant = store
        .find_participant(participant_id.clone())
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("participant `{participant_id}` not found")))?;
    if participant.status != ParticipantStatus::Active {
        return Err(ServiceError::InvalidState(format!(
            "participant `{participant_id}` has been dropped"
        )));
    }

    let question = store
        .find_question(request.question_id.clone())
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("question `{}` not found", request.question_id))
        })?;
    if !question.choices.contains(&request.choice) {
        return Err(ServiceError::InvalidInput(format!(
            "`{}` is not a choice of question `{}`",
            request.choice, question.id
        )));
    }

    let accepted_at = SystemTime::now();
    let created_at_ms = epoch_millis(accepted_at);
    if created_at_ms > question.deadline_ms {
        return Err(ServiceError::InvalidState(format!(
            "question `{}` closed for answers",
            question.id
        )));
    }

    let is_correct = request.choice == question.correct_choice;
    store
        .insert_answer(Answer {
            participant_id: participant_id.clone(),
            question_id: question.id.clone(),
            choice: request.choice.clone(),
            latency_ms: request.latency_ms,
            is_correct,
            created_at_ms,
        })
        .await?;

    info!(
        participant_id = %participant_id,
        question_id = %question.id,
        latency_ms = request.latency_ms,
        "answer recorded"
    );
    Ok(AnswerReceipt::new(participant_id, request, accepted_at))
}
