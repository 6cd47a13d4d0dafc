// =============================================================================
// WebSocket Handler — live stream to one viewer
// =============================================================================
//
// Clients connect to `/` (or `/ws`) and receive:
//   1. A snapshot array with one record per tracked instrument.
//   2. One array per upstream batch thereafter.
//
// Clients are not expected to send anything; Ping is answered, Close ends
// the session. No replay on reconnect: a new connection gets a new snapshot.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::app_state::AppState;

// =============================================================================
// WebSocket upgrade handler
// =============================================================================

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

// =============================================================================
// Connection handler
// =============================================================================

/// Manages a single subscriber connection.
///
/// Runs two branches via `tokio::select!`:
///   1. **Push** — forward frames queued by the hub (snapshot first).
///   2. **Recv** — Ping/Pong and Close handling.
async fn handle_ws_connection(socket: WebSocket, state: Arc<AppState>) {
    let mut subscription = state.hub.register();
    let id = subscription.id;
    info!(subscriber = %id, "Frontend connected");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            // ── Push: forward queued frames ─────────────────────────────
            frame = subscription.frames.recv() => {
                let Some(frame) = frame else {
                    // The hub dropped us (queue overflow).
                    warn!(subscriber = %id, "subscriber evicted by hub — closing");
                    break;
                };
                match timeout(state.send_timeout, sender.send(Message::Text(frame.to_string()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(subscriber = %id, error = %e, "WebSocket send failed — disconnecting");
                        break;
                    }
                    Err(_) => {
                        warn!(subscriber = %id, timeout = ?state.send_timeout, "WebSocket send timed out — disconnecting");
                        break;
                    }
                }
            }

            // ── Recv: inbound control frames ────────────────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            debug!(error = %e, "Failed to send Pong — disconnecting");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(subscriber = %id, "WebSocket Close frame received");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Text / Binary / Pong: nothing to do.
                    }
                    Some(Err(e)) => {
                        warn!(subscriber = %id, error = %e, "WebSocket receive error — disconnecting");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    state.hub.unregister(id);
    info!(subscriber = %id, "Frontend disconnected");
}

// =============================================================================
// Tests
// =============================================================================
