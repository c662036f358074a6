//! WebSocket transport: accept connections, forward inbound frames to the
//! session coordinator and drain the per-connection outbound queue.
//!
//! All game decisions live in the coordinator; this layer only parses frames
//! and shuttles bytes.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::protocol::ClientMessage;
use crate::session::SessionHandle;

/// A peer that cannot drain its socket within this bound is evicted rather
/// than allowed to stall the round
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(session): State<SessionHandle>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, session))
}

/// Handle an individual WebSocket connection
async fn handle_socket(socket: WebSocket, session: SessionHandle) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let conn = session.attach(outbound_tx);
    tracing::info!(conn, "websocket connected");

    loop {
        tokio::select! {
            frame = outbound_rx.recv() => {
                match frame {
                    Some(json) => {
                        match tokio::time::timeout(SEND_TIMEOUT, sender.send(Message::Text(json.into()))).await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => {
                                tracing::debug!(conn, error = %e, "send failed");
                                break;
                            }
                            Err(_) => {
                                tracing::warn!(conn, "send timed out; evicting connection");
                                break;
                            }
                        }
                    }
                    None => break,
                }
            }

            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!(conn, "received frame: {}", text);
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(message) => session.client(conn, message),
                            // Malformed frames are logged and ignored; the
                            // connection stays open
                            Err(e) => tracing::warn!(conn, error = %e, "ignoring malformed frame"),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(conn, error = %e, "websocket error");
                        break;
                    }
                }
            }
        }
    }

    session.detach(conn);
    tracing::info!(conn, "websocket disconnected");
}
