//! WebSocket handler for Axum
//!
//! Moves frames between the socket and the [`ChatHub`](super::hub::ChatHub).
//! A socket is authenticated either by `?token=` at upgrade or by an
//! `authenticate` event sent as its first frame.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{stream::StreamExt, SinkExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use frontdesk_shared::Principal;

use crate::error::ApiResult;
use crate::state::AppState;

use super::connection::Connection;
use super::events::{ClientEvent, ServerEvent};
use super::hub::ChatHub;

/// How long queued events may take to flush once the socket is closing
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
pub struct WebSocketQuery {
    token: Option<String>,
}

/// Upgrade to a websocket, authenticating up front when a token is supplied
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WebSocketQuery>,
) -> ApiResult<Response> {
    let principal = match params.token.as_deref() {
        Some(token) if !token.is_empty() => Some(state.hub.resolve_principal(token).await?),
        _ => None,
    };

    tracing::info!(
        principal_id = ?principal.as_ref().map(Principal::id),
        "WebSocket connection upgrade requested"
    );

    let hub = Arc::clone(&state.hub);
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, principal, hub)))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, principal: Option<Principal>, hub: Arc<ChatHub>) {
    let (mut sender, mut receiver) = socket.split();

    // Create channel for sending events to this connection
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    // Forward queued events until every sender is gone, then close the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        return; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Failed to serialize WebSocket event");
                }
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let mut conn: Option<Arc<Connection>> = match principal {
        Some(principal) => Some(hub.connect(principal, tx.clone()).await),
        None => None,
    };

    while let Some(frame) = receiver.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                tracing::info!(
                    connection_id = ?conn.as_ref().map(|c| c.id),
                    "WebSocket close frame received"
                );
                break;
            }
            // Axum answers pings; binary frames are ignored
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(error = ?e, "WebSocket receive failed");
                break;
            }
        };

        let event = match serde_json::from_str::<ClientEvent>(&text) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to parse client event");
                let _ = tx.send(ServerEvent::Error {
                    message: "Invalid event format".to_string(),
                });
                continue;
            }
        };

        if let Some(conn) = conn.clone() {
            hub.dispatch(&conn, event).await;
            continue;
        }

        match event {
            ClientEvent::Authenticate { token } => match hub.authenticate(&token, tx.clone()).await {
                Ok(authenticated) => conn = Some(authenticated),
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket authentication failed");
                    let _ = tx.send(ServerEvent::AuthError {
                        message: e.client_message(),
                    });
                    break;
                }
            },
            other => {
                tracing::debug!(event = other.name(), "Event before authentication");
                let _ = tx.send(ServerEvent::AuthError {
                    message: "Authentication required".to_string(),
                });
            }
        }
    }

    // Cleanup on disconnect
    if let Some(conn) = conn.take() {
        tracing::info!(
            connection_id = %conn.id,
            principal_id = %conn.principal.id(),
            "WebSocket connection closing"
        );
        hub.disconnect(&conn).await;
    }

    drop(tx);
    if tokio::time::timeout(FLUSH_TIMEOUT, &mut send_task).await.is_err() {
        send_task.abort();
    }
}
