//! Per-connection pump, from accepted handshake through teardown.
//!
//! 1. Opens a [`ClientSession`] and attaches it to its channel
//! 2. Spawns the writer, which drains the outbound queue and sends pings
//! 3. Decodes inbound frames and dispatches them through the channel
//! 4. Closes with 1001 on shutdown or heartbeat timeout
//! 5. Always tears down: session removed, optional eviction, metrics

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame as WsCloseFrame, Message, WebSocket};
use figlink_core::{
    Channel, ClientSession, CloseCode, Outbound, OutboundReceiver, RelayError, ResolvedHandshake,
    Role,
};
use futures::stream::SplitSink;
use futures::{SinkExt, Stream, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::time::{self, Interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use super::heartbeat::{HEARTBEAT_TIMEOUT_REASON, HeartbeatResult, run_heartbeat};
use crate::metrics::{
    RELAY_DRIVER_CONFLICTS_TOTAL, RELAY_MESSAGES_DROPPED_TOTAL, RELAY_MESSAGES_ROUTED_TOTAL,
    RELAY_PROTOCOL_ERRORS_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE,
    WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};
use crate::server::AppState;
use crate::shutdown::SHUTDOWN_REASON;

/// How long the writer gets to flush a server-initiated close frame.
pub(super) const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Run one accepted connection to completion.
#[instrument(skip_all, fields(channel_id = %handshake.channel_id, role = %handshake.role))]
pub async fn run_ws_session(
    socket: WebSocket,
    handshake: ResolvedHandshake,
    remote: SocketAddr,
    state: AppState,
) {
    let ResolvedHandshake { role, channel_id } = handshake;
    let config = state.config.clone();
    let (session, outbound_rx) = ClientSession::open(role, Some(remote));
    let (ws_tx, mut ws_rx) = socket.split();

    let channel = match state.registry.attach(&channel_id, session.clone()) {
        Ok(channel) => channel,
        Err(e) => {
            if matches!(e, RelayError::DriverAlreadyBound { .. }) {
                counter!(RELAY_DRIVER_CONFLICTS_TOTAL).increment(1);
            }
            if let Some(code) = e.close_code() {
                let _ = session.close(code, e.to_string());
            }
            info!(client_id = %session.id(), %remote, error = %e, "connection refused");
            let _ = time::timeout(CLOSE_FLUSH_TIMEOUT, write_outbound(ws_tx, outbound_rx, None)).await;
            let _ = time::timeout(CLOSE_FLUSH_TIMEOUT, await_peer_close(&mut ws_rx)).await;
            return;
        }
    };

    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    info!(
        client_id = %session.id(),
        %remote,
        plugins = channel.plugin_count(),
        has_driver = channel.has_driver(),
        "client connected"
    );

    let ping_every = config
        .heartbeat_enabled()
        .then_some(config.heartbeat_interval);
    let conn_token = state.shutdown.child_token();
    let mut writer = tokio::spawn(write_outbound(ws_tx, outbound_rx, ping_every));

    let heartbeat = ping_every.map(|interval| {
        let session = session.clone();
        let token = conn_token.clone();
        let timeout = config.heartbeat_timeout;
        tokio::spawn(async move {
            let result = run_heartbeat(session.clone(), interval, timeout, token.clone()).await;
            if result == HeartbeatResult::TimedOut {
                warn!(
                    client_id = %session.id(),
                    silent_for = ?session.last_pong_elapsed(),
                    "peer unresponsive, closing"
                );
                let _ = session.close(CloseCode::GoingAway, HEARTBEAT_TIMEOUT_REASON);
                token.cancel();
            }
        })
    });

    let mut server_closed = false;
    loop {
        tokio::select! {
            frame = ws_rx.next() => match frame {
                Some(Ok(msg)) => {
                    if !handle_message(&session, &channel, msg) {
                        break;
                    }
                }
                Some(Err(e)) => {
                    let err = RelayError::Transport(e.to_string());
                    warn!(client_id = %session.id(), error = %err, "socket error");
                    break;
                }
                None => break,
            },
            () = conn_token.cancelled() => {
                let _ = session.close(CloseCode::GoingAway, SHUTDOWN_REASON);
                server_closed = true;
                break;
            }
        }
    }

    // Teardown runs on every exit path.
    let _ = session.mark_closed();
    let _ = channel.remove_session(&session);
    if config.evict_empty_channels {
        let _ = state.registry.evict_if_empty(&channel_id);
    }

    conn_token.cancel();
    if let Some(heartbeat) = heartbeat {
        let _ = heartbeat.await;
    }
    if server_closed {
        // Keep reading until the peer answers the close, so replies it
        // already queued (pongs, data) don't hit a dropped socket.
        let _ = time::timeout(CLOSE_FLUSH_TIMEOUT, &mut writer).await;
        let _ = time::timeout(CLOSE_FLUSH_TIMEOUT, await_peer_close(&mut ws_rx)).await;
    }
    writer.abort();

    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(session.age().as_secs_f64());
    info!(
        client_id = %session.id(),
        sent = session.sent_count(),
        "client disconnected"
    );
}

/// Handle one inbound WebSocket message. Returns `false` when the peer
/// closed.
fn handle_message(session: &Arc<ClientSession>, channel: &Channel, msg: Message) -> bool {
    match msg {
        Message::Text(text) => {
            session.mark_alive();
            route_frame(session, channel, text.as_bytes());
        }
        Message::Binary(data) => {
            session.mark_alive();
            route_frame(session, channel, &data);
        }
        Message::Ping(_) | Message::Pong(_) => session.mark_alive(),
        Message::Close(frame) => {
            let (code, reason) = frame.map_or((None, String::new()), |f| {
                (Some(f.code), f.reason.to_string())
            });
            info!(client_id = %session.id(), ?code, %reason, "peer closed");
            return false;
        }
    }
    true
}

fn route_frame(session: &ClientSession, channel: &Channel, frame: &[u8]) {
    let Some(envelope) = session.accept_frame(frame) else {
        counter!(RELAY_PROTOCOL_ERRORS_TOTAL).increment(1);
        return;
    };

    let delivered = channel.dispatch(session, &envelope);
    if delivered == 0 {
        counter!(RELAY_MESSAGES_DROPPED_TOTAL).increment(1);
    } else {
        let direction = match session.role() {
            Role::Plugin => "plugin_to_driver",
            Role::Driver => "driver_to_plugin",
        };
        counter!(RELAY_MESSAGES_ROUTED_TOTAL, "direction" => direction).increment(delivered as u64);
    }
    debug!(client_id = %session.id(), kind = %envelope.kind, delivered, "frame routed");
}

/// Discard inbound frames until the peer's close frame or end of stream.
pub(super) async fn await_peer_close<S>(stream: &mut S)
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
}

/// Drain the outbound queue to the socket, pinging on `ping_every`.
///
/// Stops after sending a close frame, when the queue closes, or when the
/// socket rejects a write.
async fn write_outbound(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: OutboundReceiver,
    ping_every: Option<Duration>,
) {
    let mut ping = ping_every.map(|every| {
        let mut interval = time::interval_at(time::Instant::now() + every, every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        tokio::select! {
            item = outbound.recv() => match item {
                Some(Outbound::Frame(text)) => {
                    if sink.send(Message::Text(text.to_string().into())).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Close(frame)) => {
                    let close = WsCloseFrame {
                        code: frame.code.as_u16(),
                        reason: frame.reason.into(),
                    };
                    let _ = sink.send(Message::Close(Some(close))).await;
                    break;
                }
                None => break,
            },
            () = next_ping(ping.as_mut()) => {
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn next_ping(ping: Option<&mut Interval>) {
    match ping {
        Some(interval) => {
            let _ = interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
