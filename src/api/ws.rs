//! WebSocket Status Streaming
//!
//! Clients subscribe per swap id or to the full stream. A fresh connection
//! replays the latest known status of its swap, then receives every
//! subsequent transition.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tracing::debug;

use super::server::SharedState;

/// WebSocket upgrade for a single swap
///
/// Route: /ws/swaps/{id}
pub async fn ws_swap_handler(
    ws: WebSocketUpgrade,
    Path(swap_id): Path<String>,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, Some(swap_id), state))
}

/// WebSocket upgrade for all swap updates
///
/// Route: /ws/swaps
pub async fn ws_all_swaps_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, None, state))
}

async fn handle_socket(socket: WebSocket, swap_id: Option<String>, state: SharedState) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.events.subscribe();

    // Late subscribers get the latest status, nothing older
    if let Some(id) = &swap_id {
        if let Some(latest) = state.events.latest(id) {
            if let Ok(json) = serde_json::to_string(&latest) {
                if sender.send(Message::Text(json)).await.is_err() {
                    return;
                }
            }
        }
    }

    let filter_id = swap_id.clone();
    let send_task = tokio::spawn(async move {
        while let Ok(update) = rx.recv().await {
            if let Some(id) = &filter_id {
                if &update.id != id {
                    continue;
                }
            }

            let json = match serde_json::to_string(&update) {
                Ok(json) => json,
                Err(_) => continue,
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(Message::Text(text)) => {
                    debug!(text = %text, "ignoring inbound websocket message");
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }
}
