//! WebSocket connection handler.
//!
//! One reader loop per connection feeds text frames through [`handle_text`];
//! a sender task drains the connection's outbound channel into the socket.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tandem_core::protocol::ControlFrame;
use tokio::sync::mpsc;

use crate::state::{AuthOutcome, ConnectionId, RelayState};

/// Handle a single WebSocket connection until it closes.
pub async fn handle_websocket(socket: WebSocket, state: RelayState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let conn_id = state.connect(tx);

    // ── Sender Task ───────────────────────────────────────────────────────

    let sender_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // ── Process Frames ────────────────────────────────────────────────────

    while let Some(msg_result) = ws_receiver.next().await {
        match msg_result {
            Ok(Message::Text(text)) => handle_text(&state, conn_id, &text),
            Ok(Message::Close(_)) => {
                tracing::debug!(conn = %conn_id, "Client sent close frame");
                break;
            }
            Err(e) => {
                tracing::warn!(conn = %conn_id, error = %e, "WebSocket error");
                break;
            }
            _ => {} // Binary, Ping, Pong
        }
    }

    // ── Cleanup ───────────────────────────────────────────────────────────

    state.disconnect(conn_id);
    sender_task.abort();
}

/// Process one inbound text frame from `conn_id`.
pub fn handle_text(state: &RelayState, conn_id: ConnectionId, text: &str) {
    let frame = match ControlFrame::decode(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(conn = %conn_id, error = %e, "Dropping malformed frame");
            return;
        }
    };

    match &frame {
        ControlFrame::Auth {
            room_id,
            address,
            signature,
        } => match state.authenticate(conn_id, room_id, address, signature) {
            AuthOutcome::Authenticated { .. } => {}
            AuthOutcome::Unauthorized => {
                state.send_to_connection(conn_id, &ControlFrame::error("Unauthorized"));
            }
            AuthOutcome::AlreadyAuthenticated | AuthOutcome::UnknownConnection => {}
        },
        _ => {
            state.route(conn_id, text, &frame);
        }
    }
}
