//! Server, relay, and logging settings.

use serde::{Deserialize, Serialize};

/// Default bind port. Matches the port existing plugins and drivers dial.
pub const DEFAULT_PORT: u16 = 3002;

/// Origins the Figma plugin iframe is served from.
pub const FIGMA_ORIGINS: [&str; 2] = ["https://www.figma.com", "https://figma.com"];

/// Network listener and connection settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Handshake header carrying the role token.
    pub role_header: String,
    /// Handshake header carrying the channel id.
    pub channel_header: String,
    /// WebSocket ping interval in milliseconds. `0` disables heartbeats.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a peer is considered dead, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Largest accepted inbound frame, in bytes.
    pub max_message_size: usize,
    /// Directory served for non-API GET requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_dir: Option<String>,
    /// Origins allowed by CORS on the HTTP endpoints.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            role_header: "role".to_string(),
            channel_header: "channel-id".to_string(),
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            max_message_size: 16 * 1024 * 1024,
            static_dir: None,
            allowed_origins: FIGMA_ORIGINS.iter().map(|o| (*o).to_string()).collect(),
        }
    }
}

/// Channel lifecycle settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Drop a channel from the registry once its last session leaves.
    pub evict_empty_channels: bool,
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level (`RUST_LOG` overrides).
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
