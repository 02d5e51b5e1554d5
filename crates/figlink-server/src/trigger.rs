//! `POST /api/trigger-actionpoint`: an external producer asks every plugin
//! on a channel to fire an action point.
//!
//! The request names the channel through the configured channel header or a
//! `channelId` body field. The broadcast goes out as a
//! `remote-actionpoint-trigger` envelope stamped with the server time. An
//! unknown channel is not created; the call succeeds with `delivered: 0`.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use figlink_core::envelope::REMOTE_ACTIONPOINT_TRIGGER;
use figlink_core::{ChannelId, Envelope};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::metrics::{HTTP_TRIGGERS_TOTAL, RELAY_MESSAGES_DROPPED_TOTAL, RELAY_MESSAGES_ROUTED_TOTAL};
use crate::server::AppState;

/// Request body.
///
/// Ids are kept as raw JSON so numeric ids are accepted and forwarded as
/// sent.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
    /// Hardware component the action point belongs to.
    pub component_id: Option<Value>,
    /// Action point to fire.
    pub action_point_id: Option<Value>,
    /// Button that fired it.
    pub button_id: Option<Value>,
    /// Target channel when no channel header is sent.
    pub channel_id: Option<Value>,
}

/// Response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct TriggerResponse {
    /// Whether the trigger was accepted.
    pub success: bool,
    /// Human-readable outcome.
    pub message: String,
    /// Plugins the trigger was handed to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered: Option<usize>,
}

impl TriggerResponse {
    fn rejected(message: impl Into<String>) -> Response {
        let body = Self {
            success: false,
            message: message.into(),
            delivered: None,
        };
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

/// `null`, `false`, `0` and `""` count as missing.
fn is_set(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| is_set(v))
}

/// Strings without quotes, everything else as JSON.
fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn channel_from_body(value: Option<&Value>) -> Option<String> {
    match present(value)? {
        Value::String(s) => Some(s.trim().to_owned()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Validated trigger fields.
#[derive(Debug, PartialEq, Eq)]
struct Trigger<'a> {
    component_id: &'a Value,
    action_point_id: &'a Value,
    button_id: &'a Value,
}

impl<'a> Trigger<'a> {
    fn from_request(req: &'a TriggerRequest) -> Option<Self> {
        Some(Self {
            component_id: present(req.component_id.as_ref())?,
            action_point_id: present(req.action_point_id.as_ref())?,
            button_id: present(req.button_id.as_ref())?,
        })
    }

    fn envelope(&self, timestamp: &str) -> Envelope {
        Envelope::new(
            REMOTE_ACTIONPOINT_TRIGGER,
            json!({
                "componentId": self.component_id,
                "actionPointId": self.action_point_id,
                "buttonId": self.button_id,
                "timestamp": timestamp,
            }),
        )
    }
}

/// POST /api/trigger-actionpoint
pub async fn trigger_actionpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let req: TriggerRequest = if body.is_empty() {
        TriggerRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(req) => req,
            Err(e) => {
                warn!(error = %e, "trigger request body is not valid JSON");
                return TriggerResponse::rejected("request body must be a JSON object");
            }
        }
    };

    let Some(trigger) = Trigger::from_request(&req) else {
        warn!(?req, "trigger request missing parameters");
        return TriggerResponse::rejected(
            "missing parameters: componentId, actionPointId and buttonId are required",
        );
    };

    let header_channel = headers
        .get(state.config.channel_header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned);
    let Some(channel_id) = header_channel.or_else(|| channel_from_body(req.channel_id.as_ref()))
    else {
        warn!("trigger request names no channel");
        return TriggerResponse::rejected(format!(
            "missing channel: send the '{}' header or a channelId field",
            state.config.channel_header
        ));
    };
    let channel_id = ChannelId::from(channel_id);

    let envelope = trigger.envelope(&chrono::Utc::now().to_rfc3339());
    let delivered = state
        .registry
        .get(&channel_id)
        .map_or(0, |channel| channel.broadcast_to_plugins(&envelope));

    counter!(HTTP_TRIGGERS_TOTAL).increment(1);
    if delivered == 0 {
        counter!(RELAY_MESSAGES_DROPPED_TOTAL).increment(1);
    } else {
        counter!(RELAY_MESSAGES_ROUTED_TOTAL, "direction" => "http_to_plugin")
            .increment(delivered as u64);
    }
    info!(
        channel_id = %channel_id,
        component_id = %trigger.component_id,
        action_point_id = %trigger.action_point_id,
        button_id = %trigger.button_id,
        delivered,
        "action point trigger forwarded"
    );

    let body = TriggerResponse {
        success: true,
        message: format!(
            "trigger for action point '{}' (id {}) of component '{}' forwarded",
            display(trigger.button_id),
            display(trigger.action_point_id),
            display(trigger.component_id)
        ),
        delivered: Some(delivered),
    };
    (StatusCode::OK, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use figlink_core::{ChannelRegistry, ClientSession, Outbound, Role};
    use tower::ServiceExt;

    use crate::config::ServerConfig;
    use crate::server::RelayServer;

    fn server() -> (RelayServer, Arc<ChannelRegistry>) {
        let registry = Arc::new(ChannelRegistry::new());
        (RelayServer::new(ServerConfig::default(), registry.clone()), registry)
    }

    async fn post(server: &RelayServer, channel: Option<&str>, body: &str) -> (StatusCode, serde_json::Value) {
        let mut req = Request::builder()
            .method("POST")
            .uri("/api/trigger-actionpoint")
            .header("content-type", "application/json");
        if let Some(channel) = channel {
            req = req.header("channel-id", channel);
        }
        let resp = server
            .router()
            .oneshot(req.body(Body::from(body.to_owned())).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    const FULL: &str = r#"{"componentId":"c1","actionPointId":"ap1","buttonId":"BTN_RED"}"#;

    #[test]
    fn falsy_ids_count_as_missing() {
        for falsy in [json!(null), json!(false), json!(0), json!("")] {
            let req = TriggerRequest {
                component_id: Some(json!("c1")),
                action_point_id: Some(falsy.clone()),
                button_id: Some(json!("b")),
                channel_id: None,
            };
            assert!(Trigger::from_request(&req).is_none(), "{falsy} accepted");
        }
    }

    #[test]
    fn ids_are_forwarded_as_sent() {
        let req: TriggerRequest =
            serde_json::from_str(r#"{"componentId":7,"actionPointId":" ap1 ","buttonId":true}"#)
                .unwrap();
        let env = Trigger::from_request(&req).unwrap().envelope("t");
        assert_eq!(env.payload()["componentId"], 7);
        assert_eq!(env.payload()["actionPointId"], " ap1 ");
        assert_eq!(env.payload()["buttonId"], true);
    }

    #[test]
    fn envelope_shape() {
        let req: TriggerRequest = serde_json::from_str(FULL).unwrap();
        let env = Trigger::from_request(&req)
            .unwrap()
            .envelope("2025-01-01T00:00:00Z");
        assert_eq!(env.kind, "remote-actionpoint-trigger");
        assert_eq!(env.payload()["componentId"], "c1");
        assert_eq!(env.payload()["actionPointId"], "ap1");
        assert_eq!(env.payload()["buttonId"], "BTN_RED");
        assert_eq!(env.payload()["timestamp"], "2025-01-01T00:00:00Z");
    }

    #[tokio::test]
    async fn missing_parameters_is_400() {
        let (server, _) = server();
        let (status, body) = post(&server, Some("abc"), r#"{"componentId":"c1"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["message"].as_str().unwrap().contains("buttonId"));
    }

    #[tokio::test]
    async fn invalid_json_is_400() {
        let (server, _) = server();
        let (status, body) = post(&server, Some("abc"), "{nope").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn numeric_ids_are_accepted() {
        let (server, registry) = server();
        let (plugin, mut rx) = ClientSession::open(Role::Plugin, None);
        let _ = registry.attach(&ChannelId::from("abc"), plugin).unwrap();

        let (status, body) = post(
            &server,
            Some("abc"),
            r#"{"componentId":7,"actionPointId":3,"buttonId":"BTN_RED"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["delivered"], 1);
        assert_eq!(
            body["message"],
            "trigger for action point 'BTN_RED' (id 3) of component '7' forwarded"
        );

        let Outbound::Frame(frame) = rx.try_recv().unwrap() else {
            panic!("expected a frame");
        };
        let env = Envelope::decode_str(&frame).unwrap();
        assert_eq!(env.payload()["componentId"], 7);
        assert_eq!(env.payload()["actionPointId"], 3);
    }

    #[tokio::test]
    async fn non_object_body_is_400() {
        let (server, _) = server();
        let (status, body) = post(&server, Some("abc"), "[1, 2]").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "request body must be a JSON object");
    }

    #[tokio::test]
    async fn missing_channel_is_400() {
        let (server, _) = server();
        let (status, body) = post(&server, None, FULL).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().contains("channel"));
    }

    #[tokio::test]
    async fn unknown_channel_delivers_nothing_and_creates_nothing() {
        let (server, registry) = server();
        let (status, body) = post(&server, Some("ghost"), FULL).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["delivered"], 0);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn broadcasts_to_plugins_on_channel() {
        let (server, registry) = server();
        let (plugin, mut rx) = ClientSession::open(Role::Plugin, None);
        let (driver, mut drx) = ClientSession::open(Role::Driver, None);
        let id = ChannelId::from("abc");
        let _ = registry.attach(&id, plugin).unwrap();
        let _ = registry.attach(&id, driver).unwrap();

        let body = r#"{"componentId":"c1","actionPointId":"ap1","buttonId":"BTN_RED","channelId":"abc"}"#;
        let (status, resp) = post(&server, None, body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp["delivered"], 1);
        assert!(resp["message"].as_str().unwrap().contains("BTN_RED"));

        let Outbound::Frame(frame) = rx.try_recv().unwrap() else {
            panic!("expected a frame");
        };
        let env = Envelope::decode_str(&frame).unwrap();
        assert_eq!(env.kind, REMOTE_ACTIONPOINT_TRIGGER);
        assert_eq!(env.payload()["buttonId"], "BTN_RED");
        assert!(env.payload()["timestamp"].is_string());
        // Drivers never see triggers.
        assert!(drx.try_recv().is_err());
    }
}
