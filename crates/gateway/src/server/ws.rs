//! WebSocket endpoint for agent sessions.
//!
//! Flow:
//! 1. Client connects to `/ws` (bearer token in `?token=` or the
//!    `Authorization` header when one is configured; bad tokens close
//!    with code 1008).
//! 2. Client sends `init_agent`; the gateway creates or resumes the
//!    session and answers with `connection_established`.
//! 3. Message loop: `user_message`, `cancel`,
//!    `tool_confirmation_response`, `clear`, `compact`.
//! 4. On disconnect the session saves state and detaches its observers.

use std::borrow::Cow;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::mpsc;
use uuid::Uuid;

use ad_domain::AgentEvent;

use crate::protocol::ClientMessage;
use crate::server::connections::OutboundFrame;
use crate::server::session::ChatSession;
use crate::state::AppState;

/// Policy-violation close code sent on failed authentication.
const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Constant-time token comparison via SHA-256 digest.
/// Hashing normalizes lengths so ct_eq always compares 32 bytes.
fn token_eq(a: &str, b: &str) -> bool {
    let ha = Sha256::digest(a.as_bytes());
    let hb = Sha256::digest(b.as_bytes());
    ha.ct_eq(&hb).into()
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// GET /ws — upgrade to WebSocket.
///
/// When `server.auth_token` is configured, the token must arrive in the
/// `token` query parameter or as `Authorization: Bearer <token>`. Absent
/// configuration means dev mode: open access.
pub async fn agent_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let authorized = match state.config.server.auth_token.as_deref() {
        None => true,
        Some(expected) => {
            let bearer = headers
                .get(axum::http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "));
            let provided = query.token.as_deref().or(bearer).unwrap_or("");
            token_eq(provided, expected)
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, authorized))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_socket(socket: WebSocket, state: AppState, authorized: bool) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    if !authorized {
        tracing::warn!("rejecting websocket with invalid auth token");
        let _ = ws_sink
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_POLICY_VIOLATION,
                reason: Cow::from("invalid or missing auth token"),
            })))
            .await;
        return;
    }

    let conn_id = Uuid::new_v4();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundFrame>(256);
    state.connections.register(conn_id, outbound_tx.clone());
    tracing::info!(conn_id = %conn_id, "websocket connected");

    // Writer task: forwards outbound frames to the socket sink.
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            match frame {
                OutboundFrame::Text(text) => {
                    if ws_sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                OutboundFrame::Close => {
                    let _ = ws_sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    // Reader loop.
    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(text) => {
                state.connections.touch(&conn_id);
                handle_frame(&state, &conn_id, &outbound_tx, &text).await;
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {
                // axum answers WS-level pings itself; just record liveness.
                state.connections.touch(&conn_id);
            }
            _ => {}
        }
    }

    // Cleanup: tear down the chat session, stop the writer.
    if let Some(chat) = state.connections.remove(&conn_id) {
        chat.close().await;
    }
    writer.abort();
    tracing::info!(conn_id = %conn_id, "websocket disconnected");
}

/// Parse and route one inbound frame. Protocol errors answer with an
/// `error` event on the same socket and keep the connection open.
async fn handle_frame(
    state: &AppState,
    conn_id: &Uuid,
    outbound: &mpsc::Sender<OutboundFrame>,
    text: &str,
) {
    let message = match ClientMessage::parse(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(conn_id = %conn_id, error = %e, "unparseable frame");
            send_error(outbound, format!("invalid message format: {e}")).await;
            return;
        }
    };

    match message {
        ClientMessage::InitAgent {
            session_id,
            device_id,
        } => {
            if state.connections.chat_session(conn_id).is_some() {
                send_error(outbound, "agent is already initialized on this connection").await;
                return;
            }
            match ChatSession::open(
                state.clone(),
                session_id,
                device_id.clone(),
                outbound.clone(),
            )
            .await
            {
                Ok(chat) => {
                    state.connections.bind_session(conn_id, chat, device_id);
                }
                Err(e) => {
                    tracing::error!(conn_id = %conn_id, error = %e, "session init failed");
                    send_error(outbound, format!("failed to initialize session: {e}")).await;
                }
            }
        }
        other => match state.connections.chat_session(conn_id) {
            Some(chat) => chat.handle(other).await,
            None => {
                send_error(outbound, "send init_agent before other messages").await;
            }
        },
    }
}

async fn send_error(outbound: &mpsc::Sender<OutboundFrame>, message: impl Into<String>) {
    let event = AgentEvent::error(message.into());
    if let Ok(frame) = serde_json::to_string(&event) {
        let _ = outbound.send(OutboundFrame::Text(frame)).await;
    }
}
