use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{dto::session::Identity, dto::ws::ClientMessage, state::SharedState};

/// Handle the full lifecycle of one admitted session link.
///
/// Identity and session key were resolved before the upgrade; this registers the link
/// with the session coordinator, forwards every text frame to it and reports the close.
pub async fn handle_socket(
    state: SharedState,
    socket: WebSocket,
    session_key: String,
    identity: Identity,
) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound frames flowing while we await inbound ones.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let identity_id = identity.id.clone();
    let (session, connection_id) = match state
        .sessions()
        .admit(&session_key, identity, outbound_tx.clone())
        .await
    {
        Ok(admitted) => admitted,
        Err(err) => {
            warn!(session = %session_key, error = %err, "failed to admit connection");
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    info!(
        session = %session_key,
        connection_id = %connection_id,
        identity = %identity_id,
        "session link open"
    );

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match ClientMessage::from_json_str(&text) {
                Ok(message) => {
                    if session.inbound(&connection_id, message).is_err() {
                        warn!(session = %session_key, connection_id = %connection_id, "session stopped; closing link");
                        let _ = outbound_tx.send(Message::Close(None));
                        break;
                    }
                }
                Err(err) => {
                    warn!(
                        session = %session_key,
                        connection_id = %connection_id,
                        error = %err,
                        "dropping malformed frame"
                    );
                }
            },
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                debug!(session = %session_key, connection_id = %connection_id, "client closed");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {
                debug!(session = %session_key, connection_id = %connection_id, "ignoring binary frame");
            }
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(session = %session_key, connection_id = %connection_id, error = %err, "websocket error");
                break;
            }
        }
    }

    if session.disconnect(&connection_id).is_err() {
        debug!(session = %session_key, "session already stopped");
    }
    info!(session = %session_key, connection_id = %connection_id, "session link closed");

    finalize(writer_task, outbound_tx).await;
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
