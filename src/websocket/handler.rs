use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap},
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::connection_manager::ConnectionHandle;
use crate::error::RelayError;
use crate::metrics::{ConnectionMetrics, WsMessageMetrics};
use crate::server::AppState;

use super::message::{ClientMessage, OutboundMessage, ServerMessage};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade handler
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state, query, headers),
    fields(has_query_token = query.token.is_some())
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    let is_admin = match state.settings.relay.admin_token.as_deref() {
        // Open deployment: every connection may act as administrator
        None => true,
        Some(expected) => extract_token(&query, &headers).as_deref() == Some(expected),
    };

    tracing::debug!(is_admin, "WebSocket upgrade requested");

    ws.on_upgrade(move |socket| handle_socket(socket, state, is_admin))
}

/// Extract token from query parameter or Authorization header
fn extract_token(query: &WsQuery, headers: &HeaderMap) -> Option<String> {
    // First try query parameter
    if let Some(ref token) = query.token {
        return Some(token.clone());
    }

    // Then try Authorization header
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }

    None
}

/// Handle an established WebSocket connection
#[tracing::instrument(name = "ws.connection", skip(socket, state))]
async fn handle_socket(socket: WebSocket, state: AppState, is_admin: bool) {
    let connection_id = Uuid::new_v4();
    let connection_start = std::time::Instant::now();

    // Create channel for sending messages to this connection
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(state.settings.websocket.channel_buffer);

    let handle = match state.controller.connect(connection_id, is_admin, tx).await {
        Ok(h) => h,
        Err(e) => {
            tracing::error!(connection_id = %connection_id, error = %e, "Connection rejected");
            let (mut ws_sender, _) = socket.split();
            let error_msg = ServerMessage::error(e.code(), e.to_string());
            if let Ok(json) = serde_json::to_string(&error_msg) {
                let _ = ws_sender.send(Message::Text(json.into())).await;
            }
            let _ = ws_sender.close().await;
            return;
        }
    };

    ConnectionMetrics::record_opened(state.registry.count());

    tracing::info!(
        connection_id = %connection_id,
        index = handle.index,
        is_admin,
        "WebSocket connection established"
    );

    // Split socket into sender and receiver
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Task for sending messages from channel to WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let frame = match msg.into_frame() {
                Ok(f) => f,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize message");
                    continue;
                }
            };

            if ws_sender.send(frame).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    // Task for receiving messages from WebSocket
    let state_clone = state.clone();
    let handle_clone = handle.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(msg) => {
                    if !process_message(msg, &state_clone, &handle_clone).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    // Wait for either task to complete, or for the heartbeat to give up on us
    let recv_finished = tokio::select! {
        _ = &mut send_task => {
            tracing::debug!(connection_id = %connection_id, "Send task completed");
            false
        }
        _ = &mut recv_task => {
            tracing::debug!(connection_id = %connection_id, "Receive task completed");
            true
        }
        _ = handle.closed() => {
            tracing::info!(connection_id = %connection_id, "Connection closed after ping timeout");
            false
        }
    };
    send_task.abort();
    // No client message may be handled once the connection is disconnected
    if !recv_finished {
        stop_task(recv_task).await;
    }

    // Timeouts and graceful closes share this path
    state.controller.disconnect(connection_id);

    let duration = connection_start.elapsed().as_secs_f64();
    ConnectionMetrics::record_closed(state.registry.count(), duration);

    tracing::info!(
        connection_id = %connection_id,
        index = handle.index,
        duration_secs = duration,
        "WebSocket connection closed"
    );
}

/// Abort a connection task and wait until it has actually stopped
async fn stop_task(task: JoinHandle<()>) {
    task.abort();
    if let Err(e) = task.await {
        if !e.is_cancelled() {
            tracing::error!(error = %e, "Connection task panicked");
        }
    }
}

/// Process a received WebSocket message
/// Returns false if the connection should be closed
async fn process_message(msg: Message, state: &AppState, handle: &Arc<ConnectionHandle>) -> bool {
    match msg {
        Message::Text(text) => {
            handle.update_activity();

            // Parse client message
            let client_msg: ClientMessage = match serde_json::from_str(&text) {
                Ok(m) => m,
                Err(e) => {
                    reject(handle, RelayError::InvalidMessage(e.to_string()));
                    return true;
                }
            };

            handle_client_message(client_msg, state, handle).await;
            true
        }
        Message::Binary(_) => {
            handle.update_activity();
            WsMessageMetrics::record_rejected("UNSUPPORTED_FORMAT");
            let _ = handle.send(ServerMessage::error(
                "UNSUPPORTED_FORMAT",
                "Binary messages are not supported",
            ));
            true
        }
        Message::Ping(_) => {
            handle.update_activity();
            // Axum handles pong automatically, but we update activity
            true
        }
        Message::Pong(_) => {
            handle.update_activity();
            true
        }
        Message::Close(_) => {
            tracing::debug!(connection_id = %handle.id, "Received close frame");
            false
        }
    }
}

/// Handle a parsed client message
#[tracing::instrument(
    name = "ws.message",
    skip(state, handle),
    fields(
        connection_id = %handle.id,
        index = handle.index,
        event = msg.event_name()
    )
)]
async fn handle_client_message(msg: ClientMessage, state: &AppState, handle: &Arc<ConnectionHandle>) {
    WsMessageMetrics::record_received(msg.event_name());

    if let Err(e) = state.controller.handle_message(handle, msg).await {
        reject(handle, e);
    }
}

/// Log and drop a bad message, telling only its sender
fn reject(handle: &ConnectionHandle, error: RelayError) {
    tracing::warn!(
        connection_id = %handle.id,
        code = error.code(),
        error = %error,
        "Client message rejected"
    );
    WsMessageMetrics::record_rejected(error.code());
    let _ = handle.send(ServerMessage::error(error.code(), error.to_string()));
}
