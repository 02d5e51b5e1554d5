//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use figlink_settings::FiglinkSettings;

/// Runtime configuration for [`RelayServer`](crate::server::RelayServer).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` picks a free port).
    pub port: u16,
    /// Handshake header carrying the role token.
    pub role_header: String,
    /// Handshake header carrying the channel id.
    pub channel_header: String,
    /// Ping interval. Zero disables heartbeats.
    pub heartbeat_interval: Duration,
    /// Silence tolerated before a peer is dropped.
    pub heartbeat_timeout: Duration,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Directory served as the fallback route.
    pub static_dir: Option<PathBuf>,
    /// CORS origins for the HTTP endpoints.
    pub allowed_origins: Vec<String>,
    /// Drop empty channels on session teardown.
    pub evict_empty_channels: bool,
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &FiglinkSettings) -> Self {
        let server = &settings.server;
        Self {
            host: server.host.clone(),
            port: server.port,
            role_header: server.role_header.to_ascii_lowercase(),
            channel_header: server.channel_header.to_ascii_lowercase(),
            heartbeat_interval: Duration::from_millis(server.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(server.heartbeat_timeout_ms),
            max_message_size: server.max_message_size,
            static_dir: server.static_dir.as_ref().map(PathBuf::from),
            allowed_origins: server.allowed_origins.clone(),
            evict_empty_channels: settings.relay.evict_empty_channels,
        }
    }

    /// Whether server pings are enabled.
    pub fn heartbeat_enabled(&self) -> bool {
        !self.heartbeat_interval.is_zero()
    }

    /// `host:port` bind string.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_settings(&FiglinkSettings::default())
    }
}
