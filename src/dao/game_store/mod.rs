/// In-process store used by tests and single-node runs.
pub mod memory;
/// MongoDB backend with change-stream subscriptions.
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use futures::{future::BoxFuture, stream::BoxStream};
use thiserror::Error;

use crate::{
    dao::{
        models::{Answer, GameState, Participant, ParticipantStatus, Question, now_millis},
        storage::{StorageError, StorageResult},
    },
    state::state_machine::TransitionError,
};

pub use memory::{InMemoryGameStore, StoreOp};

/// Write function run by [`GameStore::transact_state`].
///
/// It receives the latest committed snapshot (`None` when no game exists yet)
/// and returns the next snapshot. Backends may call it several times when an
/// optimistic write loses a race, so it must be pure given its input.
pub type StateUpdate =
    Box<dyn FnMut(Option<&GameState>) -> Result<GameState, TransitionError> + Send>;

/// Failure of a state transaction.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// The write function refused the snapshot; nothing was written.
    #[error(transparent)]
    Rejected(#[from] TransitionError),
    /// The backend failed; nothing was written.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Abstraction over the transactional document store backing the live game.
pub trait GameStore: Send + Sync {
    /// Read-validate-write the live state atomically, stamping `last_update`.
    fn transact_state(
        &self,
        update: StateUpdate,
    ) -> BoxFuture<'static, Result<GameState, TransactionError>>;
    /// Current live state; `None` before the first action.
    fn load_state(&self) -> BoxFuture<'static, StorageResult<Option<GameState>>>;
    /// Stream the current state followed by every committed revision, in order.
    fn watch_state(&self) -> BoxStream<'static, StorageResult<Option<GameState>>>;
    /// Look up a question by id.
    fn find_question(&self, id: String) -> BoxFuture<'static, StorageResult<Option<Question>>>;
    /// Insert or replace a question.
    fn save_question(&self, question: Question) -> BoxFuture<'static, StorageResult<()>>;
    /// Answers to a question in arrival order.
    fn answers_for_question(
        &self,
        question_id: String,
    ) -> BoxFuture<'static, StorageResult<Vec<Answer>>>;
    /// Insert an answer, failing with `AlreadyExists` when the participant already answered.
    fn insert_answer(&self, answer: Answer) -> BoxFuture<'static, StorageResult<()>>;
    /// Look up a participant by id.
    fn find_participant(
        &self,
        id: String,
    ) -> BoxFuture<'static, StorageResult<Option<Participant>>>;
    /// Insert or replace a participant.
    fn save_participant(&self, participant: Participant) -> BoxFuture<'static, StorageResult<()>>;
    /// Participants currently in `status`.
    fn participants_with_status(
        &self,
        status: ParticipantStatus,
    ) -> BoxFuture<'static, StorageResult<Vec<Participant>>>;
    /// Set the status of every listed participant in one batched write,
    /// returning how many documents changed.
    fn batch_update_participant_status(
        &self,
        ids: Vec<String>,
        status: ParticipantStatus,
    ) -> BoxFuture<'static, StorageResult<usize>>;
    /// Cheap round trip proving the backend answers.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Timestamp assigned to the next committed revision.
pub(crate) fn next_revision(previous: Option<u64>) -> u64 {
    let now = now_millis();
    match previous {
        Some(previous) => now.max(previous + 1),
        None => now,
    }
}
