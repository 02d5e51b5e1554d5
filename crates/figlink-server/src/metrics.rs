//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Call once at startup before anything is recorded. The returned handle
/// renders the `/metrics` body.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

// Metric names shared by the connection pump and HTTP handlers.

/// Sessions accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Sessions currently open (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Sessions torn down (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Handshakes rejected with 1008 (counter, labels: reason).
pub const WS_HANDSHAKE_REJECTIONS_TOTAL: &str = "ws_handshake_rejections_total";
/// Session lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Second drivers turned away with 1013 (counter).
pub const RELAY_DRIVER_CONFLICTS_TOTAL: &str = "relay_driver_conflicts_total";
/// Malformed inbound frames dropped (counter).
pub const RELAY_PROTOCOL_ERRORS_TOTAL: &str = "relay_protocol_errors_total";
/// Envelope deliveries (counter, labels: direction).
pub const RELAY_MESSAGES_ROUTED_TOTAL: &str = "relay_messages_routed_total";
/// Envelopes that reached no recipient (counter).
pub const RELAY_MESSAGES_DROPPED_TOTAL: &str = "relay_messages_dropped_total";
/// Accepted HTTP trigger requests (counter).
pub const HTTP_TRIGGERS_TOTAL: &str = "http_triggers_total";
