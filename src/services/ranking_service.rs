use thiserror::Error;
use tracing::{info, warn};

use crate::{
    dao::{
        game_store::GameStore,
        models::{Answer, GameResults, ParticipantStatus, Period, RankedAnswer},
        storage::StorageError,
    },
    services::retry::{self, Failure, RetryPolicy},
    state::state_machine::GamePhase,
};

const RANKING_DEPTH: usize = 10;

/// Everything the ShowResults transition writes back into the game state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankingOutcome {
    /// Question the rankings were computed for.
    pub question_id: String,
    /// Rankings published with the results phase.
    pub results: GameResults,
    /// `ShowingResults`, or `AllIncorrect` when nobody answered correctly.
    pub phase: GamePhase,
    /// Carryover after this question: grown when nobody was correct, reset otherwise.
    pub prize_carryover: u64,
    /// Participants flipped to `Dropped` by this computation.
    pub eliminated: Vec<String>,
}

/// Rankings derived from a question's answers, before any write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ranking {
    /// Fastest correct answers, ascending by latency.
    pub top10: Vec<RankedAnswer>,
    /// Slowest correct answers, descending by latency.
    pub worst10: Vec<RankedAnswer>,
    /// Every correct responder tied at the slowest latency.
    pub eliminated: Vec<String>,
    /// Every correct responder tied at the fastest latency, on gong questions only.
    pub champions: Option<(Vec<String>, Period)>,
    /// Number of correct answers considered.
    pub correct_answers: usize,
}

#[derive(Debug, Error)]
enum RankingError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("question `{0}` not found")]
    QuestionNotFound(String),
}

impl RankingError {
    fn into_failure(self) -> Failure<Self> {
        match &self {
            RankingError::Storage(err) if err.is_transient() => Failure::Transient(self),
            RankingError::Storage(_) => Failure::Abort(self),
            RankingError::QuestionNotFound(_) => Failure::Abort(self),
        }
    }
}

/// Rank the answers of one question.
///
/// Only correct answers are ranked. Ties keep arrival order (stable sort)
/// and the lists are cut at ten entries. `gong_period` is the period of the
/// question when it was armed as period-final; champions are only crowned then.
pub fn compute_rankings(answers: &[Answer], gong_period: Option<Period>) -> Ranking {
    let mut correct: Vec<&Answer> = answers.iter().filter(|answer| answer.is_correct).collect();
    correct.sort_by_key(|answer| answer.latency_ms);

    let top10 = correct
        .iter()
        .take(RANKING_DEPTH)
        .map(|answer| RankedAnswer::from(*answer))
        .collect();

    let mut slowest_first = correct.clone();
    slowest_first.sort_by(|a, b| b.latency_ms.cmp(&a.latency_ms));
    let worst10 = slowest_first
        .iter()
        .take(RANKING_DEPTH)
        .map(|answer| RankedAnswer::from(*answer))
        .collect();

    let eliminated = match slowest_first.first() {
        Some(slowest) => tied_at(&correct, slowest.latency_ms),
        None => Vec::new(),
    };

    let champions = match (gong_period, correct.first()) {
        (Some(period), Some(fastest)) => Some((tied_at(&correct, fastest.latency_ms), period)),
        _ => None,
    };

    Ranking {
        top10,
        worst10,
        eliminated,
        champions,
        correct_answers: correct.len(),
    }
}

fn tied_at(answers: &[&Answer], latency_ms: u32) -> Vec<String> {
    answers
        .iter()
        .filter(|answer| answer.latency_ms == latency_ms)
        .map(|answer| answer.participant_id.clone())
        .collect()
}

/// Apply the prize policy to a finished ranking.
pub fn settle(
    question_id: &str,
    ranking: Ranking,
    base_prize: u64,
    carryover: u64,
) -> RankingOutcome {
    let (phase, prize_carryover) = if ranking.correct_answers == 0 {
        (GamePhase::AllIncorrect, carryover.saturating_add(base_prize))
    } else {
        (GamePhase::ShowingResults, 0)
    };

    RankingOutcome {
        question_id: question_id.to_owned(),
        results: GameResults::ranked(ranking.top10, ranking.worst10, ranking.champions),
        phase,
        prize_carryover,
        eliminated: ranking.eliminated,
    }
}

/// Outcome recorded when rankings could not be computed. The game still
/// moves on to the results screen and the carryover is left untouched.
pub fn degraded(question_id: &str, carryover: u64) -> RankingOutcome {
    RankingOutcome {
        question_id: question_id.to_owned(),
        results: GameResults::ranking_failed(),
        phase: GamePhase::ShowingResults,
        prize_carryover: carryover,
        eliminated: Vec::new(),
    }
}

/// Rank a question's answers, drop the slowest correct responders and settle
/// the prize.
///
/// Storage reads and the elimination write are retried as a unit under
/// `policy`. The function never fails: when the budget is spent or a
/// non-transient error occurs the result carries `rankingError` instead.
pub async fn rank_and_eliminate(
    store: &dyn GameStore,
    policy: &RetryPolicy,
    base_prize: u64,
    question_id: &str,
    period_final: bool,
    carryover: u64,
) -> RankingOutcome {
    let attempt = move || async move {
        let answers = store
            .answers_for_question(question_id.to_owned())
            .await
            .map_err(|err| RankingError::from(err).into_failure())?;

        let gong_period = if period_final {
            let question = store
                .find_question(question_id.to_owned())
                .await
                .map_err(|err| RankingError::from(err).into_failure())?
                .ok_or_else(|| RankingError::QuestionNotFound(question_id.to_owned()).into_failure())?;
            Some(question.period)
        } else {
            None
        };

        let ranking = compute_rankings(&answers, gong_period);
        if !ranking.eliminated.is_empty() {
            store
                .batch_update_participant_status(ranking.eliminated.clone(), ParticipantStatus::Dropped)
                .await
                .map_err(|err| RankingError::from(err).into_failure())?;
        }
        Ok::<_, Failure<RankingError>>(ranking)
    };

    match retry::execute(policy, attempt).await {
        Ok(ranking) => {
            info!(
                question_id,
                correct = ranking.correct_answers,
                eliminated = ranking.eliminated.len(),
                period_final,
                "rankings computed"
            );
            settle(question_id, ranking, base_prize, carryover)
        }
        Err(err) => {
            warn!(question_id, error = %err, "ranking failed; showing results without rankings");
            degraded(question_id, carryover)
        }
    }
}
