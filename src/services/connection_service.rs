use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::{SinkExt, Stream, StreamExt, future::ready};
use tokio::{sync::mpsc, task::JoinHandle, time::timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::ws::{ClientFrame, ClientMessage, ConnectionMessage, ServerFrame},
    error::ServiceError,
    state::{Audience, SharedState},
};

/// Releases the connection's audience slot however the handler exits.
struct ConnectionGuard<'a> {
    audience: &'a Audience,
    id: Uuid,
}

impl<'a> ConnectionGuard<'a> {
    fn open(audience: &'a Audience, id: Uuid) -> Self {
        let live = audience.connection_opened();
        debug!(id = %id, live, "connection opened");
        Self { audience, id }
    }
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        self.audience.remove(&self.id);
        let live = self.audience.connection_closed();
        info!(id = %self.id, live, "connection closed");
    }
}

/// Serialize a handshake message onto the connection's writer.
///
/// Returns `false` when the writer is gone.
fn send_message(outbound: &mpsc::UnboundedSender<ServerFrame>, message: &ConnectionMessage) -> bool {
    match serde_json::to_string(message) {
        Ok(payload) => outbound.send(ServerFrame::Text(payload)).is_ok(),
        Err(err) => {
            warn!(error = %err, "failed to serialize connection message `{message:?}`");
            true
        }
    }
}

fn reject(outbound: &mpsc::UnboundedSender<ServerFrame>, reason: String) {
    send_message(
        outbound,
        &ConnectionMessage::AuthFailed {
            reason: reason.clone(),
        },
    );
    let _ = outbound.send(ServerFrame::Close(Some(reason)));
}

/// Drive one audience connection from accept to close.
///
/// New connections are refused while the state subscription is degraded.
/// Otherwise the client has the configured timeout to send
/// `Authenticate{token}`; on success it joins the audience and receives the
/// latest event, on any failure it gets `AuthFailed` and is closed. Existing
/// members are never affected by the health flag.
pub async fn run_connection<S>(
    state: SharedState,
    mut inbound: S,
    outbound: mpsc::UnboundedSender<ServerFrame>,
) where
    S: Stream<Item = ClientFrame> + Unpin,
{
    if !state.health().is_healthy() {
        info!("refusing connection while degraded");
        reject(&outbound, ServiceError::Degraded.to_string());
        return;
    }

    let id = Uuid::new_v4();
    let _guard = ConnectionGuard::open(state.audience(), id);

    let auth_timeout = state.config().auth_timeout();
    if !send_message(
        &outbound,
        &ConnectionMessage::AuthRequired {
            timeout_ms: auth_timeout.as_millis() as u64,
        },
    ) {
        return;
    }

    let token = match timeout(auth_timeout, inbound.next()).await {
        Ok(Some(ClientFrame::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::Authenticate { token }) => token,
            Err(err) => {
                warn!(id = %id, error = %err, "malformed authentication payload");
                reject(&outbound, "malformed authentication payload".into());
                return;
            }
        },
        Ok(Some(ClientFrame::Close)) | Ok(None) => {
            debug!(id = %id, "connection closed before authenticating");
            return;
        }
        Err(_) => {
            warn!(id = %id, "authentication timed out");
            reject(&outbound, "authentication timed out".into());
            return;
        }
    };

    let verified = match state.verifier().verify(&token).await {
        Ok(verified) => verified,
        Err(err) => {
            warn!(id = %id, error = %err, "authentication failed");
            reject(&outbound, err.to_string());
            return;
        }
    };

    if !send_message(
        &outbound,
        &ConnectionMessage::AuthSuccess {
            subject_id: verified.subject_id.clone(),
        },
    ) {
        return;
    }
    if !state.audience().admit(id, outbound.clone()) {
        return;
    }
    info!(id = %id, subject_id = %verified.subject_id, "connection authenticated");

    while let Some(frame) = inbound.next().await {
        match frame {
            ClientFrame::Text(text) => {
                debug!(id = %id, payload = %text, "ignoring message from authenticated client");
            }
            ClientFrame::Close => break,
        }
    }
}

/// Handle the full lifecycle of an audience WebSocket.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerFrame>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let (message, closing) = match frame {
                ServerFrame::Text(text) => (Message::Text(text.into()), false),
                ServerFrame::Close(reason) => (
                    Message::Close(reason.map(|reason| CloseFrame {
                        code: close_code::POLICY,
                        reason: reason.into(),
                    })),
                    true,
                ),
            };
            if sender.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    let inbound = receiver
        .filter_map(|message| {
            ready(match message {
                Ok(Message::Text(text)) => Some(ClientFrame::Text(text.as_str().to_owned())),
                Ok(Message::Close(_)) => Some(ClientFrame::Close),
                Ok(Message::Binary(_) | Message::Ping(_) | Message::Pong(_)) => None,
                Err(err) => {
                    warn!(error = %err, "websocket receive error");
                    Some(ClientFrame::Close)
                }
            })
        })
        .boxed();

    run_connection(state, inbound, outbound_tx.clone()).await;
    finalize(writer_task, outbound_tx).await;
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<ServerFrame>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
