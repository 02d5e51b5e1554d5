//! Role resolution: turns connection metadata into a validated
//! `(role, channel)` pair before any session object exists.
//!
//! One canonical contract is supported: a role header whose value must
//! contain `figma` (plugin) or `driver` (driver), compared
//! case-insensitively, and a separate channel header carried verbatim.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::HandshakeError;
use crate::ids::ChannelId;

/// Default name of the role-carrying header.
pub const DEFAULT_ROLE_HEADER: &str = "role";
/// Default name of the channel-id-carrying header.
pub const DEFAULT_CHANNEL_HEADER: &str = "channel-id";

/// Which side of the bridge a session is on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Figma plugin UI. Any number per channel.
    Plugin,
    /// Hardware driver. At most one per channel.
    Driver,
}

impl Role {
    /// Match a role token by case-insensitive substring.
    ///
    /// `figma` is checked before `driver`, so a token containing both
    /// resolves to [`Role::Plugin`].
    pub fn from_token(token: &str) -> Option<Self> {
        let lowered = token.to_lowercase();
        if lowered.contains("figma") {
            Some(Self::Plugin)
        } else if lowered.contains("driver") {
            Some(Self::Driver)
        } else {
            None
        }
    }

    /// Lowercase label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plugin => "plugin",
            Self::Driver => "driver",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successful handshake outcome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedHandshake {
    /// Resolved role.
    pub role: Role,
    /// Channel to join.
    pub channel_id: ChannelId,
}

/// Validate handshake header values.
///
/// The channel is checked first. Blank (whitespace-only) values count as
/// absent; a non-blank channel id is kept exactly as sent.
pub fn resolve_handshake(
    role_header: Option<&str>,
    channel_header: Option<&str>,
) -> Result<ResolvedHandshake, HandshakeError> {
    let channel = channel_header
        .filter(|v| !v.trim().is_empty())
        .ok_or(HandshakeError::MissingChannelId)?;

    let token = role_header
        .filter(|v| !v.trim().is_empty())
        .ok_or(HandshakeError::MissingRole)?;

    let role =
        Role::from_token(token).ok_or_else(|| HandshakeError::UnrecognizedRole(token.to_owned()))?;

    Ok(ResolvedHandshake {
        role,
        channel_id: ChannelId::from(channel),
    })
}
