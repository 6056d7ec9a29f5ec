use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::app_state::AppState;
use crate::engine::grouping;
use crate::engine::session::Outbound;

/// WebSocket close code 1008 (policy violation), sent to unauthorized clients.
const CLOSE_POLICY_VIOLATION: u16 = 1008;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Shared-secret gate. Must match the configured secret when one is set.
    pub key: Option<String>,
    /// Explicit group code, `[A-Za-z0-9\-_.]{1,32}`, case-insensitive.
    pub g: Option<String>,
}

pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let addr = client_addr(&headers, peer);
    let secret = &state.config.server.shared_secret;
    let authorized = secret.is_empty() || query.key.as_deref() == Some(secret.as_str());

    ws.on_upgrade(move |socket| handle_socket(socket, state, query, addr, authorized))
}

async fn handle_socket(
    mut socket: WebSocket,
    state: Arc<AppState>,
    query: WsQuery,
    addr: String,
    authorized: bool,
) {
    if !authorized {
        warn!(%addr, "closing unauthorized connection");
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_POLICY_VIOLATION,
                reason: "unauthorized".into(),
            })))
            .await;
        return;
    }

    let room_key = grouping::resolve_room_key(
        query.g.as_deref(),
        Some(addr.as_str()),
        state.config.rooms.require_code,
    );
    let (session, rx) = state.engine.connect(room_key, addr);

    let (ws_tx, mut ws_rx) = socket.split();
    let send_task = tokio::spawn(write_loop(ws_tx, rx));

    loop {
        tokio::select! {
            // Forced termination by the liveness monitor. Falls through to
            // the same cleanup as a client-initiated close.
            _ = session.cancel.cancelled() => break,

            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Err(err) = state.engine.handle_frame(&session, &text) {
                        debug!(session = %session.id, %err, "dropped inbound frame");
                    }
                }
                Some(Ok(Message::Pong(_))) => session.mark_alive(),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(session = %session.id, %err, "websocket error");
                    break;
                }
            },
        }
    }

    send_task.abort();
    state.engine.disconnect(session.id);
}

/// Drain the session's outbound queue into the socket.
async fn write_loop(mut ws_tx: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<Outbound>) {
    while let Some(out) = rx.recv().await {
        let msg = match out {
            Outbound::Frame(frame) => Message::Text(frame.as_ref().into()),
            Outbound::Ping => Message::Ping(vec![].into()),
        };
        if ws_tx.send(msg).await.is_err() {
            break;
        }
    }
}

/// Best-effort client address, only trusting proxy headers from loopback.
///
/// When the direct peer is a loopback address the connection is coming
/// through a local reverse proxy and X-Forwarded-For / X-Real-IP are trusted;
/// otherwise the peer IP is used so spoofed headers cannot move a client
/// into another rate budget or room bucket.
fn client_addr(headers: &HeaderMap, peer: SocketAddr) -> String {
    if peer.ip().is_loopback() {
        if let Some(forwarded) = headers.get("x-forwarded-for")
            && let Ok(val) = forwarded.to_str()
            && let Some(first) = val.split(',').next()
            && !first.trim().is_empty()
        {
            return first.trim().to_string();
        }

        if let Some(real_ip) = headers.get("x-real-ip")
            && let Ok(val) = real_ip.to_str()
        {
            return val.trim().to_string();
        }
    }

    peer.ip().to_string()
}
