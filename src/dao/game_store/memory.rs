use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use futures::{
    FutureExt, StreamExt,
    future::{BoxFuture, ready},
    stream::BoxStream,
};
use indexmap::IndexMap;
use tokio::sync::broadcast::{self, error::RecvError};

use super::{GameStore, StateUpdate, TransactionError, next_revision};
use crate::dao::{
    models::{Answer, GameState, Participant, ParticipantStatus, Question},
    storage::{StorageError, StorageErrorKind, StorageResult},
};

const WATCH_CAPACITY: usize = 64;

/// Store operations that can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// `GameStore::transact_state`.
    TransactState,
    /// `GameStore::load_state`.
    LoadState,
    /// `GameStore::watch_state`; fails the subscription itself.
    WatchState,
    /// `GameStore::find_question`.
    FindQuestion,
    /// `GameStore::save_question`.
    SaveQuestion,
    /// `GameStore::answers_for_question`.
    AnswersForQuestion,
    /// `GameStore::insert_answer`.
    InsertAnswer,
    /// `GameStore::find_participant`.
    FindParticipant,
    /// `GameStore::save_participant`.
    SaveParticipant,
    /// `GameStore::participants_with_status`.
    ParticipantsWithStatus,
    /// `GameStore::batch_update_participant_status`.
    BatchUpdateParticipantStatus,
    /// `GameStore::health_check`.
    HealthCheck,
}

type Revision = Result<Option<GameState>, (StorageErrorKind, String)>;

/// Process-local store used when no database is configured and by the test suite.
///
/// Transactions are serialised by a mutex, watchers are fed through a
/// broadcast channel written under the same lock so revisions reach every
/// subscriber in commit order.
#[derive(Clone)]
pub struct InMemoryGameStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    state: Mutex<Option<GameState>>,
    revisions: broadcast::Sender<Revision>,
    questions: DashMap<String, Question>,
    /// Keyed by `(question_id, participant_id)`, in arrival order.
    answers: Mutex<IndexMap<(String, String), Answer>>,
    participants: Mutex<IndexMap<String, Participant>>,
    faults: DashMap<StoreOp, (StorageErrorKind, u32)>,
}

impl Default for InMemoryGameStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGameStore {
    /// Create an empty store with no game state.
    pub fn new() -> Self {
        let (revisions, _receiver) = broadcast::channel(WATCH_CAPACITY);
        Self {
            inner: Arc::new(MemoryInner {
                state: Mutex::new(None),
                revisions,
                questions: DashMap::new(),
                answers: Mutex::new(IndexMap::new()),
                participants: Mutex::new(IndexMap::new()),
                faults: DashMap::new(),
            }),
        }
    }

    /// Make the next `times` calls of `op` fail with `kind`.
    pub fn fail_next(&self, op: StoreOp, kind: StorageErrorKind, times: u32) {
        if times == 0 {
            self.inner.faults.remove(&op);
        } else {
            self.inner.faults.insert(op, (kind, times));
        }
    }

    /// Drop every pending injected failure.
    pub fn clear_faults(&self) {
        self.inner.faults.clear();
    }

    /// Terminate every open watch stream with an error of the given kind.
    pub fn interrupt_watchers(&self, kind: StorageErrorKind) {
        let _guard = self.inner.lock_state();
        let _ = self
            .inner
            .revisions
            .send(Err((kind, "state watch interrupted".into())));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryInner {
    fn lock_state(&self) -> MutexGuard<'_, Option<GameState>> {
        lock(&self.state)
    }

    fn take_fault(&self, op: StoreOp) -> StorageResult<()> {
        let (kind, exhausted) = {
            let Some(mut entry) = self.faults.get_mut(&op) else {
                return Ok(());
            };
            let (kind, remaining) = entry.value_mut();
            *remaining = remaining.saturating_sub(1);
            (*kind, *remaining == 0)
        };
        if exhausted {
            self.faults.remove(&op);
        }
        Err(StorageError::new(kind, format!("injected {op:?} failure")))
    }

    fn commit(&self, mut update: StateUpdate) -> Result<GameState, TransactionError> {
        self.take_fault(StoreOp::TransactState)?;
        let mut slot = self.lock_state();
        let mut next = update(slot.as_ref())?;
        next.last_update = next_revision(slot.as_ref().map(|state| state.last_update));
        *slot = Some(next.clone());
        let _ = self.revisions.send(Ok(Some(next.clone())));
        Ok(next)
    }

    fn load_state(&self) -> StorageResult<Option<GameState>> {
        self.take_fault(StoreOp::LoadState)?;
        Ok(self.lock_state().clone())
    }

    fn find_question(&self, id: &str) -> StorageResult<Option<Question>> {
        self.take_fault(StoreOp::FindQuestion)?;
        Ok(self.questions.get(id).map(|entry| entry.value().clone()))
    }

    fn save_question(&self, question: Question) -> StorageResult<()> {
        self.take_fault(StoreOp::SaveQuestion)?;
        self.questions.insert(question.id.clone(), question);
        Ok(())
    }

    fn answers_for_question(&self, question_id: &str) -> StorageResult<Vec<Answer>> {
        self.take_fault(StoreOp::AnswersForQuestion)?;
        Ok(lock(&self.answers)
            .values()
            .filter(|answer| answer.question_id == question_id)
            .cloned()
            .collect())
    }

    fn insert_answer(&self, answer: Answer) -> StorageResult<()> {
        self.take_fault(StoreOp::InsertAnswer)?;
        let key = (answer.question_id.clone(), answer.participant_id.clone());
        let mut answers = lock(&self.answers);
        if answers.contains_key(&key) {
            return Err(StorageError::new(
                StorageErrorKind::AlreadyExists,
                format!(
                    "participant `{}` already answered question `{}`",
                    key.1, key.0
                ),
            ));
        }
        answers.insert(key, answer);
        Ok(())
    }

    fn find_participant(&self, id: &str) -> StorageResult<Option<Participant>> {
        self.take_fault(StoreOp::FindParticipant)?;
        Ok(lock(&self.participants).get(id).cloned())
    }

    fn save_participant(&self, participant: Participant) -> StorageResult<()> {
        self.take_fault(StoreOp::SaveParticipant)?;
        lock(&self.participants).insert(participant.id.clone(), participant);
        Ok(())
    }

    fn participants_with_status(&self, status: ParticipantStatus) -> StorageResult<Vec<Participant>> {
        self.take_fault(StoreOp::ParticipantsWithStatus)?;
        Ok(lock(&self.participants)
            .values()
            .filter(|participant| participant.status == status)
            .cloned()
            .collect())
    }

    fn batch_update_participant_status(
        &self,
        ids: &[String],
        status: ParticipantStatus,
    ) -> StorageResult<usize> {
        self.take_fault(StoreOp::BatchUpdateParticipantStatus)?;
        let mut participants = lock(&self.participants);
        let mut changed = 0;
        for id in ids {
            if let Some(participant) = participants.get_mut(id) {
                if participant.status != status {
                    participant.status = status;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    fn watch_state(&self) -> BoxStream<'static, StorageResult<Option<GameState>>> {
        if let Err(err) = self.take_fault(StoreOp::WatchState) {
            return futures::stream::once(ready(Err(err))).boxed();
        }

        let (current, mut receiver) = {
            let slot = self.lock_state();
            (slot.clone(), self.revisions.subscribe())
        };

        async_stream::stream! {
            yield Ok(current);
            loop {
                match receiver.recv().await {
                    Ok(Ok(revision)) => yield Ok(revision),
                    Ok(Err((kind, message))) => {
                        yield Err(StorageError::new(kind, message));
                        break;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        yield Err(StorageError::new(
                            StorageErrorKind::ResourceExhausted,
                            format!("state watcher lagged behind by {skipped} revisions"),
                        ));
                        break;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
        .boxed()
    }
}

impl GameStore for InMemoryGameStore {
    fn transact_state(
        &self,
        update: StateUpdate,
    ) -> BoxFuture<'static, Result<GameState, TransactionError>> {
        ready(self.inner.commit(update)).boxed()
    }

    fn load_state(&self) -> BoxFuture<'static, StorageResult<Option<GameState>>> {
        ready(self.inner.load_state()).boxed()
    }

    fn watch_state(&self) -> BoxStream<'static, StorageResult<Option<GameState>>> {
        self.inner.watch_state()
    }

    fn find_question(&self, id: String) -> BoxFuture<'static, StorageResult<Option<Question>>> {
        ready(self.inner.find_question(&id)).boxed()
    }

    fn save_question(&self, question: Question) -> BoxFuture<'static, StorageResult<()>> {
        ready(self.inner.save_question(question)).boxed()
    }

    fn answers_for_question(
        &self,
        question_id: String,
    ) -> BoxFuture<'static, StorageResult<Vec<Answer>>> {
        ready(self.inner.answers_for_question(&question_id)).boxed()
    }

    fn insert_answer(&self, answer: Answer) -> BoxFuture<'static, StorageResult<()>> {
        ready(self.inner.insert_answer(answer)).boxed()
    }

    fn find_participant(
        &self,
        id: String,
    ) -> BoxFuture<'static, StorageResult<Option<Participant>>> {
        ready(self.inner.find_participant(&id)).boxed()
    }

    fn save_participant(&self, participant: Participant) -> BoxFuture<'static, StorageResult<()>> {
        ready(self.inner.save_participant(participant)).boxed()
    }

    fn participants_with_status(
        &self,
        status: ParticipantStatus,
    ) -> BoxFuture<'static, StorageResult<Vec<Participant>>> {
        ready(self.inner.participants_with_status(status)).boxed()
    }

    fn batch_update_participant_status(
        &self,
        ids: Vec<String>,
        status: ParticipantStatus,
    ) -> BoxFuture<'static, StorageResult<usize>> {
        ready(self.inner.batch_update_participant_status(&ids, status)).boxed()
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        ready(self.inner.take_fault(StoreOp::HealthCheck)).boxed()
    }
}
