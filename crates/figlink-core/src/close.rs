//! WebSocket close codes used by the relay.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Close codes the relay sends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum CloseCode {
    /// 1000: normal closure.
    Normal,
    /// 1001: server shutting down or peer unresponsive.
    GoingAway,
    /// 1008: missing/invalid role or channel id.
    PolicyViolation,
    /// 1013: a driver is already bound for this channel.
    TryAgainLater,
}

impl CloseCode {
    /// Numeric wire value.
    pub const fn as_u16(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::GoingAway => 1001,
            Self::PolicyViolation => 1008,
            Self::TryAgainLater => 1013,
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}

impl TryFrom<u16> for CloseCode {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1000 => Ok(Self::Normal),
            1001 => Ok(Self::GoingAway),
            1008 => Ok(Self::PolicyViolation),
            1013 => Ok(Self::TryAgainLater),
            other => Err(format!("unsupported close code {other}")),
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// A close request: code plus human-readable reason.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseFrame {
    /// Close code.
    pub code: CloseCode,
    /// Reason text sent to the peer.
    pub reason: String,
}

impl CloseFrame {
    /// Build a close frame.
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}
