//! End-to-end tests against a real listener with real WebSocket clients.

use std::sync::Arc;
use std::time::Duration;

use figlink_core::ChannelRegistry;
use figlink_server::{RelayServer, ServerConfig};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;

const TIMEOUT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    server: RelayServer,
    base: String,
}

impl TestServer {
    fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.base)
    }

    fn http_url(&self, path: &str) -> String {
        format!("http://{}{path}", self.base)
    }

    fn registry(&self) -> &Arc<ChannelRegistry> {
        self.server.registry()
    }

    /// Wait until the registry holds exactly `n` sessions.
    async fn wait_for_sessions(&self, n: usize) {
        timeout(TIMEOUT, async {
            while self.registry().session_count() != n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| {
            panic!(
                "expected {n} sessions, registry has {}",
                self.registry().session_count()
            )
        });
    }
}

fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        ..ServerConfig::default()
    }
}

async fn boot_with(config: ServerConfig) -> TestServer {
    let server = RelayServer::new(config, Arc::new(ChannelRegistry::new()));
    let (addr, _handle) = server.listen().await.unwrap();
    TestServer {
        server,
        base: addr.to_string(),
    }
}

async fn boot() -> TestServer {
    boot_with(test_config()).await
}

async fn connect(server: &TestServer, headers: &[(&'static str, &str)]) -> WsStream {
    let mut req = server.ws_url().into_client_request().unwrap();
    for (name, value) in headers {
        let _ = req
            .headers_mut()
            .insert(*name, HeaderValue::from_str(value).unwrap());
    }
    let (ws, _resp) = timeout(TIMEOUT, connect_async(req)).await.unwrap().unwrap();
    ws
}

async fn plugin(server: &TestServer, channel: &str) -> WsStream {
    connect(server, &[("role", "figma"), ("channel-id", channel)]).await
}

async fn driver(server: &TestServer, channel: &str) -> WsStream {
    connect(server, &[("role", "driver"), ("channel-id", channel)]).await
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

/// Next data frame as JSON, skipping control frames.
async fn recv_json(ws: &mut WsStream) -> Value {
    timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(Message::Binary(data))) => return serde_json::from_slice(&data).unwrap(),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                other => panic!("expected a data frame, got {other:?}"),
            }
        }
    })
    .await
    .unwrap()
}

/// Assert no data frame arrives within [`QUIET`].
async fn assert_silent(ws: &mut WsStream) {
    let got = timeout(QUIET, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                other => return other,
            }
        }
    })
    .await;
    assert!(got.is_err(), "expected silence, got {got:?}");
}

/// Read until a close frame arrives and return its code and reason.
async fn expect_close(ws: &mut WsStream) -> (u16, String) {
    timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(Some(frame)))) => {
                    return (u16::from(frame.code), frame.reason.as_str().to_owned());
                }
                Some(Ok(Message::Close(None))) => panic!("close frame without code"),
                Some(Ok(_)) => {}
                other => panic!("expected a close frame, got {other:?}"),
            }
        }
    })
    .await
    .unwrap()
}

// ── Routing ─────────────────────────────────────────────────────────

#[tokio::test]
async fn plugin_request_reaches_driver_and_reply_reaches_all_plugins() {
    let server = boot().await;
    let mut d = driver(&server, "abc").await;
    let mut p1 = plugin(&server, "abc").await;
    let mut p2 = plugin(&server, "abc").await;
    server.wait_for_sessions(3).await;

    send_json(&mut p1, json!({"type": "get-connected-components"})).await;
    assert_eq!(recv_json(&mut d).await, json!({"type": "get-connected-components"}));

    let reply = json!({"type": "connected-components", "payload": [{"name": "LED1"}]});
    send_json(&mut d, reply.clone()).await;
    assert_eq!(recv_json(&mut p1).await, reply);
    assert_eq!(recv_json(&mut p2).await, reply);
}

#[tokio::test]
async fn second_driver_is_refused_and_first_keeps_working() {
    let server = boot().await;
    let mut d1 = driver(&server, "xyz").await;
    server.wait_for_sessions(1).await;

    let mut d2 = driver(&server, "xyz").await;
    let (code, reason) = expect_close(&mut d2).await;
    assert_eq!(code, 1013);
    assert!(reason.contains("driver"));

    let mut p = plugin(&server, "xyz").await;
    server.wait_for_sessions(2).await;
    send_json(&mut p, json!({"type": "get-connected-components"})).await;
    assert_eq!(recv_json(&mut d1).await["type"], "get-connected-components");
}

#[tokio::test]
async fn plugin_without_driver_is_dropped_quietly_until_driver_arrives() {
    let server = boot().await;
    let mut p = plugin(&server, "abc").await;
    server.wait_for_sessions(1).await;

    send_json(&mut p, json!({"type": "get-connected-components"})).await;
    assert_silent(&mut p).await;

    let mut d = driver(&server, "abc").await;
    server.wait_for_sessions(2).await;
    send_json(&mut p, json!({"type": "get-connected-components"})).await;
    assert_eq!(recv_json(&mut d).await["type"], "get-connected-components");
}

#[tokio::test]
async fn driver_can_reconnect_after_disconnect() {
    let server = boot().await;
    let mut p = plugin(&server, "abc").await;
    let mut d = driver(&server, "abc").await;
    server.wait_for_sessions(2).await;

    d.close(None).await.unwrap();
    server.wait_for_sessions(1).await;

    send_json(&mut p, json!({"type": "get-connected-components"})).await;
    assert_silent(&mut p).await;

    let mut d2 = driver(&server, "abc").await;
    server.wait_for_sessions(2).await;
    send_json(&mut p, json!({"type": "get-connected-components"})).await;
    assert_eq!(recv_json(&mut d2).await["type"], "get-connected-components");
}

#[tokio::test]
async fn channels_do_not_leak() {
    let server = boot().await;
    let mut d_abc = driver(&server, "abc").await;
    let mut p_abc = plugin(&server, "abc").await;
    let mut p_xyz = plugin(&server, "xyz").await;
    server.wait_for_sessions(3).await;

    send_json(&mut d_abc, json!({"type": "connected-components", "payload": []})).await;
    assert_eq!(recv_json(&mut p_abc).await["type"], "connected-components");
    assert_silent(&mut p_xyz).await;
}

#[tokio::test]
async fn malformed_frames_are_isolated() {
    let server = boot().await;
    let mut d = driver(&server, "abc").await;
    let mut p = plugin(&server, "abc").await;
    server.wait_for_sessions(2).await;

    p.send(Message::text("this is not json")).await.unwrap();
    p.send(Message::text(r#"{"payload": 1}"#)).await.unwrap();
    p.send(Message::binary(vec![0xff, 0xfe])).await.unwrap();
    send_json(&mut p, json!({"type": "get-connected-components"})).await;

    assert_eq!(recv_json(&mut d).await["type"], "get-connected-components");
    assert_eq!(server.registry().session_count(), 2);
}

#[tokio::test]
async fn binary_frames_are_routed() {
    let server = boot().await;
    let mut d = driver(&server, "abc").await;
    let mut p = plugin(&server, "abc").await;
    server.wait_for_sessions(2).await;

    let body = json!({"type": "connected-components", "payload": [], "data": "x"});
    d.send(Message::binary(body.to_string().into_bytes()))
        .await
        .unwrap();
    assert_eq!(recv_json(&mut p).await, body);
}

// ── Handshake ───────────────────────────────────────────────────────

#[tokio::test]
async fn missing_channel_is_policy_violation() {
    let server = boot().await;
    let mut ws = connect(&server, &[("role", "figma")]).await;
    let (code, reason) = expect_close(&mut ws).await;
    assert_eq!(code, 1008);
    assert_eq!(reason, "missing channel identifier");
    assert!(server.registry().is_empty());
}

#[tokio::test]
async fn missing_role_is_policy_violation() {
    let server = boot().await;
    let mut ws = connect(&server, &[("channel-id", "abc")]).await;
    let (code, _) = expect_close(&mut ws).await;
    assert_eq!(code, 1008);
}

#[tokio::test]
async fn unknown_role_names_the_value() {
    let server = boot().await;
    let mut ws = connect(&server, &[("role", "toaster"), ("channel-id", "abc")]).await;
    let (code, reason) = expect_close(&mut ws).await;
    assert_eq!(code, 1008);
    assert!(reason.contains("toaster"));
    assert!(server.registry().is_empty());
}

// ── HTTP ────────────────────────────────────────────────────────────

#[tokio::test]
async fn http_trigger_reaches_plugins() {
    let server = boot().await;
    let mut p = plugin(&server, "abc").await;
    server.wait_for_sessions(1).await;

    let resp = reqwest::Client::new()
        .post(server.http_url("/api/trigger-actionpoint"))
        .header("channel-id", "abc")
        .json(&json!({"componentId": "c1", "actionPointId": "ap1", "buttonId": "BTN_RED"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["delivered"], 1);

    let msg = recv_json(&mut p).await;
    assert_eq!(msg["type"], "remote-actionpoint-trigger");
    assert_eq!(msg["payload"]["buttonId"], "BTN_RED");
    assert!(msg["payload"]["timestamp"].is_string());
}

#[tokio::test]
async fn http_trigger_validates_body() {
    let server = boot().await;
    let resp = reqwest::Client::new()
        .post(server.http_url("/api/trigger-actionpoint"))
        .header("channel-id", "abc")
        .json(&json!({"componentId": "c1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn health_counts_channels_and_sessions() {
    let server = boot().await;
    let _p = plugin(&server, "abc").await;
    let _d = driver(&server, "xyz").await;
    server.wait_for_sessions(2).await;

    let body: Value = reqwest::get(server.http_url("/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["channels"], 2);
    assert_eq!(body["sessions"], 2);
}

// ── Lifecycle ───────────────────────────────────────────────────────

#[tokio::test]
async fn shutdown_closes_sessions_with_going_away() {
    let server = boot().await;
    let mut p = plugin(&server, "abc").await;
    server.wait_for_sessions(1).await;

    server.server.shutdown().shutdown();
    let (code, reason) = expect_close(&mut p).await;
    assert_eq!(code, 1001);
    assert_eq!(reason, "server shutting down");
    server.wait_for_sessions(0).await;
}

#[tokio::test]
async fn silent_peer_is_dropped_by_heartbeat() {
    let server = boot_with(ServerConfig {
        heartbeat_interval: Duration::from_millis(100),
        heartbeat_timeout: Duration::from_millis(200),
        ..test_config()
    })
    .await;
    let mut p = plugin(&server, "abc").await;
    server.wait_for_sessions(1).await;

    // Not reading means pings go unanswered.
    tokio::time::sleep(Duration::from_millis(800)).await;
    let (code, reason) = expect_close(&mut p).await;
    assert_eq!(code, 1001);
    assert_eq!(reason, "heartbeat timeout");
    server.wait_for_sessions(0).await;
}

#[tokio::test]
async fn empty_channels_are_evicted_when_enabled() {
    let server = boot_with(ServerConfig {
        evict_empty_channels: true,
        ..test_config()
    })
    .await;
    let mut p = plugin(&server, "abc").await;
    server.wait_for_sessions(1).await;
    assert_eq!(server.registry().len(), 1);

    p.close(None).await.unwrap();
    server.wait_for_sessions(0).await;
    timeout(TIMEOUT, async {
        while !server.registry().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn empty_channels_are_kept_by_default() {
    let server = boot().await;
    let mut p = plugin(&server, "abc").await;
    server.wait_for_sessions(1).await;

    p.close(None).await.unwrap();
    server.wait_for_sessions(0).await;
    assert_eq!(server.registry().len(), 1);
}
