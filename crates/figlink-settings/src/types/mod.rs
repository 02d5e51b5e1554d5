//! Settings type definitions.
//!
//! All types use camelCase JSON and `#[serde(default)]`, so a settings file
//! only needs the fields it changes.

mod server;

pub use server::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 4000, "heartbeatIntervalMs": 10000 },
///   "relay": { "evictEmptyChannels": true },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FiglinkSettings {
    /// Listener and connection settings.
    pub server: ServerSettings,
    /// Channel lifecycle settings.
    pub relay: RelaySettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl FiglinkSettings {
    /// Check cross-field constraints the type system can't express.
    pub fn validate(&self) -> Result<()> {
        let server = &self.server;
        let role = server.role_header.trim();
        let channel = server.channel_header.trim();
        if role.is_empty() || channel.is_empty() {
            return Err(SettingsError::InvalidValue(
                "handshake header names must not be empty".into(),
            ));
        }
        if role.eq_ignore_ascii_case(channel) {
            return Err(SettingsError::InvalidValue(format!(
                "role and channel headers are both '{role}'"
            )));
        }
        if server.heartbeat_interval_ms > 0
            && server.heartbeat_timeout_ms < server.heartbeat_interval_ms
        {
            return Err(SettingsError::InvalidValue(format!(
                "heartbeatTimeoutMs ({}) is shorter than heartbeatIntervalMs ({})",
                server.heartbeat_timeout_ms, server.heartbeat_interval_ms
            )));
        }
        if server.max_message_size == 0 {
            return Err(SettingsError::InvalidValue(
                "maxMessageSize must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults_are_valid() {
        FiglinkSettings::default().validate().unwrap();
    }

    #[test]
    fn rejects_empty_header() {
        let mut s = FiglinkSettings::default();
        s.server.role_header = "  ".into();
        assert_matches!(s.validate(), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn rejects_same_header_for_both() {
        let mut s = FiglinkSettings::default();
        s.server.channel_header = "Role".into();
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("both"));
    }

    #[test]
    fn rejects_timeout_below_interval() {
        let mut s = FiglinkSettings::default();
        s.server.heartbeat_timeout_ms = 1_000;
        assert_matches!(s.validate(), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn disabled_heartbeat_skips_timeout_check() {
        let mut s = FiglinkSettings::default();
        s.server.heartbeat_interval_ms = 0;
        s.server.heartbeat_timeout_ms = 0;
        s.validate().unwrap();
    }

    #[test]
    fn round_trips_through_json() {
        let mut s = FiglinkSettings::default();
        s.relay.evict_empty_channels = true;
        s.server.static_dir = Some("public".into());
        let json = serde_json::to_string(&s).unwrap();
        let back: FiglinkSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
