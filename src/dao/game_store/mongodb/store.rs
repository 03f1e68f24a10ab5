use futures::{FutureExt, StreamExt, TryStreamExt, future::BoxFuture, stream::BoxStream};
use mongodb::{
    Client, Collection, Database, IndexModel,
    bson::doc,
    change_stream::{
        ChangeStream,
        event::{ChangeStreamEvent, OperationType},
    },
    options::{FullDocumentType, IndexOptions},
};
use tracing::{debug, info};

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{
        ANSWER_COLLECTION, LIVE_STATE_ID, MongoAnswerDocument, MongoParticipantDocument,
        MongoQuestionDocument, MongoStateDocument, PARTICIPANT_COLLECTION, QUESTION_COLLECTION,
        STATE_COLLECTION, answer_arrival_order, signed, status_label,
    },
};
use crate::dao::{
    game_store::{GameStore, StateUpdate, TransactionError, next_revision},
    models::{Answer, GameState, Participant, ParticipantStatus, Question},
    storage::{StorageError, StorageErrorKind, StorageResult},
};

/// Compare-and-swap rounds before a transaction reports contention.
const MAX_CAS_ATTEMPTS: u32 = 5;
const ANSWER_ONCE_INDEX: &str = "answer_once_per_question";

/// MongoDB-backed store.
///
/// The live state is a single document whose `lastUpdate` doubles as the
/// compare-and-swap token; watchers follow it through a change stream, which
/// requires a replica set.
#[derive(Clone)]
pub struct MongoGameStore {
    // Kept so the connection pool lives as long as the store.
    _client: Client,
    database: Database,
}

type StateChanges = ChangeStream<ChangeStreamEvent<MongoStateDocument>>;

impl MongoGameStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let store = Self {
            _client: client,
            database,
        };
        store.ensure_indexes().await?;
        info!(database = %config.database_name, "connected to MongoDB");
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let model = IndexModel::builder()
            .keys(doc! { "questionId": 1, "participantId": 1 })
            .options(
                IndexOptions::builder()
                    .name(ANSWER_ONCE_INDEX.to_owned())
                    .unique(true)
                    .build(),
            )
            .build();

        self.answers()
            .create_index(model)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: ANSWER_COLLECTION,
                index: ANSWER_ONCE_INDEX,
                source,
            })?;
        Ok(())
    }

    fn states(&self) -> Collection<MongoStateDocument> {
        self.database.collection(STATE_COLLECTION)
    }

    fn questions(&self) -> Collection<MongoQuestionDocument> {
        self.database.collection(QUESTION_COLLECTION)
    }

    fn answers(&self) -> Collection<MongoAnswerDocument> {
        self.database.collection(ANSWER_COLLECTION)
    }

    fn participants(&self) -> Collection<MongoParticipantDocument> {
        self.database.collection(PARTICIPANT_COLLECTION)
    }
}

async fn read_state(states: &Collection<MongoStateDocument>) -> MongoResult<Option<GameState>> {
    states
        .find_one(doc! { "_id": LIVE_STATE_ID })
        .await
        .map_err(MongoDaoError::operation("find", STATE_COLLECTION))?
        .map(GameState::try_from)
        .transpose()
}

/// One compare-and-swap round; `Ok(None)` means another writer got there first.
async fn try_commit(
    states: &Collection<MongoStateDocument>,
    update: &mut StateUpdate,
) -> Result<Option<GameState>, TransactionError> {
    let current = read_state(states).await.map_err(StorageError::from)?;
    let mut next = update(current.as_ref())?;
    let previous = current.as_ref().map(|state| state.last_update);
    next.last_update = next_revision(previous);
    let document = MongoStateDocument::from_state(&next).map_err(StorageError::from)?;

    let committed = match previous {
        None => match states.insert_one(&document).await {
            Ok(_) => true,
            Err(source) => {
                let err = MongoDaoError::operation("insert", STATE_COLLECTION)(source);
                if !err.is_duplicate_key() {
                    return Err(StorageError::from(err).into());
                }
                false
            }
        },
        Some(previous) => {
            let expected = signed(previous, STATE_COLLECTION, "lastUpdate")
                .map_err(StorageError::from)?;
            let guard = doc! { "_id": LIVE_STATE_ID, "lastUpdate": expected };
            states
                .replace_one(guard, &document)
                .await
                .map_err(MongoDaoError::operation("replace", STATE_COLLECTION))
                .map_err(StorageError::from)?
                .matched_count
                == 1
        }
    };

    Ok(committed.then_some(next))
}

async fn open_changes(
    states: &Collection<MongoStateDocument>,
) -> MongoResult<(StateChanges, Option<GameState>)> {
    // Subscribe before reading so no commit falls between the two.
    let changes = states
        .watch()
        .pipeline([doc! { "$match": { "documentKey._id": LIVE_STATE_ID } }])
        .full_document(FullDocumentType::UpdateLookup)
        .await
        .map_err(MongoDaoError::operation("watch", STATE_COLLECTION))?;
    let current = read_state(states).await?;
    Ok((changes, current))
}

impl GameStore for MongoGameStore {
    fn transact_state(
        &self,
        mut update: StateUpdate,
    ) -> BoxFuture<'static, Result<GameState, TransactionError>> {
        let states = self.states();
        async move {
            for attempt in 1..=MAX_CAS_ATTEMPTS {
                if let Some(committed) = try_commit(&states, &mut update).await? {
                    return Ok(committed);
                }
                debug!(attempt, "live state moved during transaction; retrying");
            }
            Err(StorageError::from(MongoDaoError::Contention {
                attempts: MAX_CAS_ATTEMPTS,
            })
            .into())
        }
        .boxed()
    }

    fn load_state(&self) -> BoxFuture<'static, StorageResult<Option<GameState>>> {
        let states = self.states();
        async move { Ok(read_state(&states).await?) }.boxed()
    }

    fn watch_state(&self) -> BoxStream<'static, StorageResult<Option<GameState>>> {
        let states = self.states();
        async_stream::stream! {
            let (mut changes, current) = match open_changes(&states).await {
                Ok(opened) => opened,
                Err(err) => {
                    yield Err(StorageError::from(err));
                    return;
                }
            };
            yield Ok(current);

            while let Some(event) = changes.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(source) => {
                        let err = MongoDaoError::operation("watch", STATE_COLLECTION)(source);
                        yield Err(StorageError::from(err));
                        return;
                    }
                };
                match event.operation_type {
                    OperationType::Delete => yield Ok(None),
                    OperationType::Invalidate | OperationType::Drop | OperationType::DropDatabase => {
                        yield Err(StorageError::new(
                            StorageErrorKind::Unavailable,
                            "live state change stream invalidated",
                        ));
                        return;
                    }
                    _ => {
                        let Some(document) = event.full_document else {
                            continue;
                        };
                        match GameState::try_from(document) {
                            Ok(state) => yield Ok(Some(state)),
                            Err(err) => {
                                yield Err(StorageError::from(err));
                                return;
                            }
                        }
                    }
                }
            }
        }
        .boxed()
    }

    fn find_question(&self, id: String) -> BoxFuture<'static, StorageResult<Option<Question>>> {
        let questions = self.questions();
        async move {
            let document = questions
                .find_one(doc! { "_id": id.as_str() })
                .await
                .map_err(MongoDaoError::operation("find", QUESTION_COLLECTION))?;
            Ok(document.map(Question::try_from).transpose()?)
        }
        .boxed()
    }

    fn save_question(&self, question: Question) -> BoxFuture<'static, StorageResult<()>> {
        let questions = self.questions();
        async move {
            let id = question.id.clone();
            let document = MongoQuestionDocument::try_from(question)?;
            questions
                .replace_one(doc! { "_id": id.as_str() }, &document)
                .upsert(true)
                .await
                .map_err(MongoDaoError::operation("upsert", QUESTION_COLLECTION))?;
            Ok(())
        }
        .boxed()
    }

    fn answers_for_question(
        &self,
        question_id: String,
    ) -> BoxFuture<'static, StorageResult<Vec<Answer>>> {
        let answers = self.answers();
        async move {
            let documents: Vec<MongoAnswerDocument> = answers
                .find(doc! { "questionId": question_id.as_str() })
                .sort(answer_arrival_order())
                .await
                .map_err(MongoDaoError::operation("find", ANSWER_COLLECTION))?
                .try_collect()
                .await
                .map_err(MongoDaoError::operation("cursor", ANSWER_COLLECTION))?;
            let answers = documents
                .into_iter()
                .map(Answer::try_from)
                .collect::<MongoResult<Vec<_>>>()?;
            Ok(answers)
        }
        .boxed()
    }

    fn insert_answer(&self, answer: Answer) -> BoxFuture<'static, StorageResult<()>> {
        let answers = self.answers();
        async move {
            let (participant_id, question_id) =
                (answer.participant_id.clone(), answer.question_id.clone());
            let document = MongoAnswerDocument::try_from(answer)?;
            match answers.insert_one(&document).await {
                Ok(_) => Ok(()),
                Err(source) => {
                    let err = MongoDaoError::operation("insert", ANSWER_COLLECTION)(source);
                    if err.is_duplicate_key() {
                        Err(StorageError::with_source(
                            StorageErrorKind::AlreadyExists,
                            format!(
                                "participant `{participant_id}` already answered question `{question_id}`"
                            ),
                            err,
                        ))
                    } else {
                        Err(err.into())
                    }
                }
            }
        }
        .boxed()
    }

    fn find_participant(
        &self,
        id: String,
    ) -> BoxFuture<'static, StorageResult<Option<Participant>>> {
        let participants = self.participants();
        async move {
            let document = participants
                .find_one(doc! { "_id": id.as_str() })
                .await
                .map_err(MongoDaoError::operation("find", PARTICIPANT_COLLECTION))?;
            Ok(document.map(Participant::from))
        }
        .boxed()
    }

    fn save_participant(&self, participant: Participant) -> BoxFuture<'static, StorageResult<()>> {
        let participants = self.participants();
        async move {
            let id = participant.id.clone();
            let document = MongoParticipantDocument::from(participant);
            participants
                .replace_one(doc! { "_id": id.as_str() }, &document)
                .upsert(true)
                .await
                .map_err(MongoDaoError::operation("upsert", PARTICIPANT_COLLECTION))?;
            Ok(())
        }
        .boxed()
    }

    fn participants_with_status(
        &self,
        status: ParticipantStatus,
    ) -> BoxFuture<'static, StorageResult<Vec<Participant>>> {
        let participants = self.participants();
        async move {
            let documents: Vec<MongoParticipantDocument> = participants
                .find(doc! { "status": status_label(status) })
                .await
                .map_err(MongoDaoError::operation("find", PARTICIPANT_COLLECTION))?
                .try_collect()
                .await
                .map_err(MongoDaoError::operation("cursor", PARTICIPANT_COLLECTION))?;
            Ok(documents.into_iter().map(Participant::from).collect())
        }
        .boxed()
    }

    fn batch_update_participant_status(
        &self,
        ids: Vec<String>,
        status: ParticipantStatus,
    ) -> BoxFuture<'static, StorageResult<usize>> {
        let participants = self.participants();
        async move {
            if ids.is_empty() {
                return Ok(0);
            }
            let label = status_label(status);
            let result = participants
                .update_many(
                    doc! { "_id": { "$in": ids }, "status": { "$ne": label } },
                    doc! { "$set": { "status": label } },
                )
                .await
                .map_err(MongoDaoError::operation("update", PARTICIPANT_COLLECTION))?;
            Ok(result.modified_count as usize)
        }
        .boxed()
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let database = self.database.clone();
        async move {
            database
                .run_command(doc! { "ping": 1 })
                .await
                .map_err(|source| MongoDaoError::HealthPing { source })?;
            Ok(())
        }
        .boxed()
    }
}
