#![allow(dead_code)]

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{sync::mpsc, task::JoinHandle, time::timeout};
use tokio_stream::wrappers::UnboundedReceiverStream;

use trivia_live_back::{
    config::{AppConfig, SeedData},
    dao::{
        game_store::InMemoryGameStore,
        models::{Participant, ParticipantStatus, Period, Question},
    },
    dto::ws::{AudienceEvent, ClientFrame, ConnectionMessage, ServerFrame},
    services::{connection_service, game_service, token_verifier::StaticTokenVerifier},
    state::{AppState, SharedState},
};

pub const WAIT: Duration = Duration::from_secs(3);

pub fn verifier() -> StaticTokenVerifier {
    StaticTokenVerifier::new(HashMap::from([
        ("tok-ada".to_owned(), "p1".to_owned()),
        ("tok-bob".to_owned(), "p2".to_owned()),
    ]))
}

pub fn app_state(store: &InMemoryGameStore, auth_timeout: Duration) -> SharedState {
    AppState::new(
        Arc::new(store.clone()),
        AppConfig::default().with_auth_timeout(auth_timeout),
        Arc::new(verifier()),
    )
}

pub async fn seeded_store() -> InMemoryGameStore {
    let store = InMemoryGameStore::new();
    let seed = SeedData {
        questions: vec![Question {
            id: "q1".into(),
            period: Period::First,
            number: 1,
            text: "Largest planet?".into(),
            choices: vec!["Mars".into(), "Jupiter".into(), "Venus".into()],
            correct_choice: "Jupiter".into(),
            deadline_ms: u64::MAX,
            skip_attributes: vec![],
        }],
        participants: vec![
            Participant {
                id: "p1".into(),
                display_name: "Ada".into(),
                status: ParticipantStatus::Active,
                tags: vec![],
            },
            Participant {
                id: "p2".into(),
                display_name: "Bob".into(),
                status: ParticipantStatus::Active,
                tags: vec![],
            },
        ],
    };
    game_service::load_seed(&store, &seed)
        .await
        .expect("seed loads");
    store
}

/// Channel-backed audience connection driven by `run_connection`.
pub struct TestClient {
    inbound: Option<mpsc::UnboundedSender<ClientFrame>>,
    outbound: mpsc::UnboundedReceiver<ServerFrame>,
    task: JoinHandle<()>,
}

/// Something the server sent to one client.
#[derive(Debug, PartialEq)]
pub enum Received {
    Handshake(ConnectionMessage),
    Event(AudienceEvent),
    Close(Option<String>),
}

impl TestClient {
    pub fn connect(state: &SharedState) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(connection_service::run_connection(
            state.clone(),
            UnboundedReceiverStream::new(inbound_rx),
            outbound_tx,
        ));
        Self {
            inbound: Some(inbound_tx),
            outbound: outbound_rx,
            task,
        }
    }

    pub fn send_text(&self, text: &str) {
        if let Some(inbound) = &self.inbound {
            inbound
                .send(ClientFrame::Text(text.to_owned()))
                .expect("connection task alive");
        }
    }

    pub fn authenticate(&self, token: &str) {
        self.send_text(
            &serde_json::json!({ "event": "Authenticate", "data": { "token": token } }).to_string(),
        );
    }

    pub fn close(&mut self) {
        if let Some(inbound) = self.inbound.take() {
            let _ = inbound.send(ClientFrame::Close);
        }
    }

    pub async fn recv(&mut self) -> Received {
        let frame = timeout(WAIT, self.outbound.recv())
            .await
            .expect("server frame in time")
            .expect("connection writer open");
        match frame {
            ServerFrame::Text(text) => match serde_json::from_str::<ConnectionMessage>(&text) {
                Ok(message) => Received::Handshake(message),
                Err(_) => Received::Event(
                    serde_json::from_str(&text).expect("audience event payload"),
                ),
            },
            ServerFrame::Close(reason) => Received::Close(reason),
        }
    }

    /// Whether nothing is queued for this client right now.
    pub fn is_quiet(&mut self) -> bool {
        self.outbound.try_recv().is_err()
    }

    pub async fn finished(self) {
        timeout(WAIT, self.task)
            .await
            .expect("connection task ends in time")
            .expect("connection task does not panic");
    }
}

/// Poll `condition` until it holds or `WAIT` elapses.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
