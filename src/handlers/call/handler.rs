//! Telephony WebSocket handler
//!
//! Accepts the stream upgrade, enforces the optional bearer at the HTTP
//! layer, and runs the per-call socket loop: a writer task serializes
//! every outbound record, while the main loop multiplexes telephony
//! frames, agent events, and the 50 ms timer tick into the `Call`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{
        Query, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use tokio::select;
use tokio::sync::mpsc;

use super::call::{Call, CallFlow};
use super::messages::{TelephonyInbound, TelephonyRoute};
use crate::state::AppState;

/// Channel buffer sized for audio workloads.
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Agent events are coarser than frames; a smaller buffer suffices.
const AGENT_EVENT_BUFFER_SIZE: usize = 256;

/// Maximum WebSocket frame size (1 MB). Telephony frames are tiny; this
/// bounds a misbehaving peer.
const MAX_WS_FRAME_SIZE: usize = 1024 * 1024;

/// Maximum WebSocket message size (1 MB).
const MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;

/// Poll period driving every call-scoped deadline.
const TICK: Duration = Duration::from_millis(50);

/// Telephony stream upgrade handler for `/ws` and `/media-stream`.
///
/// If a bearer token is configured and the query string carries one, a
/// mismatch is rejected here with 401 and no call is created. A missing
/// token defers authentication to the stream's `start` event, whose
/// custom parameters carry it for providers that cannot set query
/// parameters on the stream URL.
pub async fn call_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let mut authorized = false;
    if let Some(expected) = &state.config.auth_token {
        match query.get("token") {
            Some(token) if token == expected => authorized = true,
            Some(_) => {
                tracing::warn!("stream upgrade rejected: token mismatch");
                return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
            }
            None => {}
        }
    }

    tracing::info!(authorized, "telephony stream upgrade requested");
    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_call_socket(socket, state, authorized))
}

/// Run one call to completion.
async fn handle_call_socket(socket: WebSocket, state: Arc<AppState>, authorized: bool) {
    state.call_started();

    let (mut sender, mut receiver) = socket.split();
    let (telephony_tx, mut telephony_rx) = mpsc::channel::<TelephonyRoute>(CHANNEL_BUFFER_SIZE);
    let (agent_events_tx, mut agent_events_rx) = mpsc::channel(AGENT_EVENT_BUFFER_SIZE);

    // Writer task: the telephony socket's single writer.
    let writer_task = tokio::spawn(async move {
        while let Some(route) = telephony_rx.recv().await {
            match route {
                TelephonyRoute::Outgoing(record) => {
                    let json = match serde_json::to_string(&record) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::error!(error = %e, "failed to serialize outbound record");
                            continue;
                        }
                    };
                    if let Err(e) = sender.send(Message::Text(json.into())).await {
                        tracing::warn!(error = %e, "telephony write failed");
                        break;
                    }
                }
                TelephonyRoute::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    let _ = sender.send(Message::Close(Some(frame))).await;
                    break;
                }
            }
        }
    });

    let mut call = Call::new(
        state.config.clone(),
        telephony_tx.clone(),
        agent_events_tx,
        authorized,
    );
    let session_id = call.session_id.clone();
    tracing::info!(session_id = %session_id, "call loop started");

    let mut ticker = tokio::time::interval(TICK);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let event: TelephonyInbound = match serde_json::from_str(&text) {
                        Ok(event) => event,
                        Err(e) => {
                            tracing::warn!(session_id = %session_id, error = %e, "skipping malformed telephony record");
                            continue;
                        }
                    };
                    if call.handle_telephony(event, Instant::now()).await == CallFlow::Terminate {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    tracing::info!(session_id = %session_id, "telephony socket closed by peer");
                    break;
                }
                Some(Ok(_)) => {
                    // Binary/ping/pong frames are not part of the stream protocol.
                    tracing::trace!(session_id = %session_id, "ignoring non-text frame");
                }
                Some(Err(e)) => {
                    tracing::warn!(session_id = %session_id, error = %e, "telephony socket error");
                    break;
                }
                None => {
                    tracing::info!(session_id = %session_id, "telephony socket disconnected");
                    break;
                }
            },

            event = agent_events_rx.recv() => {
                // The call holds a sender clone, so this arm only fires
                // with real events.
                if let Some(event) = event {
                    if call.handle_agent(event, Instant::now()).await == CallFlow::Terminate {
                        break;
                    }
                }
            }

            _ = ticker.tick() => {
                call.on_tick(Instant::now()).await;
            }
        }
    }

    // Cleanup: close the agent side, let the writer drain, drop the gauge.
    call.finish().await;
    drop(telephony_tx);
    let _ = writer_task.await;
    state.call_ended();
    tracing::info!(session_id = %session_id, "call loop terminated");
}
