//! `GET /ws`: resolve the handshake from request headers, then upgrade.
//!
//! A rejected handshake still completes the upgrade so the peer receives a
//! proper close frame (1008 with the reason) instead of a bare HTTP error.

use std::net::{IpAddr, SocketAddr};

use axum::extract::ws::{CloseFrame as WsCloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::http::header::SEC_WEBSOCKET_PROTOCOL;
use axum::response::Response;
use figlink_core::{HandshakeError, ResolvedHandshake, resolve_handshake};
use metrics::counter;
use tracing::{info, warn};

use super::session::{CLOSE_FLUSH_TIMEOUT, await_peer_close, run_ws_session};
use crate::config::ServerConfig;
use crate::metrics::WS_HANDSHAKE_REJECTIONS_TOTAL;
use crate::server::AppState;

/// GET /ws
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let remote = remote_addr(&headers, peer);
    let handshake = handshake_from_headers(&headers, &state.config);

    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            match handshake {
                Ok(resolved) => run_ws_session(socket, resolved, remote, state).await,
                Err(e) => reject(socket, &e, remote).await,
            }
        })
}

/// Read the configured role and channel headers and resolve them.
pub fn handshake_from_headers(
    headers: &HeaderMap,
    config: &ServerConfig,
) -> Result<ResolvedHandshake, HandshakeError> {
    let result = resolve_handshake(
        header_value(headers, &config.role_header),
        header_value(headers, &config.channel_header),
    );

    if let Err(e) = &result {
        if matches!(e, HandshakeError::MissingChannelId | HandshakeError::MissingRole)
            && headers.contains_key(SEC_WEBSOCKET_PROTOCOL)
        {
            warn!(
                protocols = ?headers.get(SEC_WEBSOCKET_PROTOCOL),
                "subprotocol role negotiation is not supported, use the handshake headers"
            );
        }
    }
    result
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Client address: first `x-forwarded-for` entry if present, else the peer.
pub fn remote_addr(headers: &HeaderMap, peer: SocketAddr) -> SocketAddr {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .and_then(|first| {
            first
                .parse::<SocketAddr>()
                .ok()
                .or_else(|| first.parse::<IpAddr>().ok().map(|ip| SocketAddr::new(ip, 0)))
        })
        .unwrap_or(peer)
}

async fn reject(mut socket: WebSocket, error: &HandshakeError, remote: SocketAddr) {
    info!(%remote, reason = %error, "handshake rejected");
    counter!(WS_HANDSHAKE_REJECTIONS_TOTAL, "reason" => error.label()).increment(1);

    let frame = WsCloseFrame {
        code: error.close_code().as_u16(),
        reason: error.to_string().into(),
    };
    if socket.send(Message::Close(Some(frame))).await.is_ok() {
        let _ = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, await_peer_close(&mut socket)).await;
    }
}
