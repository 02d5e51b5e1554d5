//! Error taxonomy for the relay.
//!
//! Every error is handled at the connection/channel boundary where it
//! occurs; none of them propagates to another connection or channel.
//!
//! | Kind | Effect |
//! |---|---|
//! | [`HandshakeError`] | connection rejected before any session exists, close 1008 |
//! | [`ProtocolError`] | one frame dropped and logged, session stays open |
//! | [`RelayError::Transport`] | logged, then cleaned up like a close |
//! | [`RelayError::DriverAlreadyBound`] | newcomer closed with 1013, existing driver untouched |

use thiserror::Error;

use crate::close::CloseCode;
use crate::ids::ChannelId;

/// Connection metadata did not yield a valid `(role, channel)` pair.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// No channel identifier header, or it was blank.
    #[error("missing channel identifier")]
    MissingChannelId,
    /// No role header, or it was blank.
    #[error("missing role")]
    MissingRole,
    /// Role header present but matched neither `figma` nor `driver`.
    #[error("unrecognized role '{0}'")]
    UnrecognizedRole(String),
}

impl HandshakeError {
    /// Close code sent to the rejected peer.
    pub const fn close_code(&self) -> CloseCode {
        CloseCode::PolicyViolation
    }

    /// Short label for metrics.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::MissingChannelId => "missing_channel",
            Self::MissingRole => "missing_role",
            Self::UnrecognizedRole(_) => "unrecognized_role",
        }
    }
}

/// An inbound frame could not be turned into an [`Envelope`](crate::Envelope).
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame bytes were not UTF-8.
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
    /// Frame text was not JSON.
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    /// JSON value was not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,
    /// Object lacked a string `type` field.
    #[error("frame has no string 'type' field")]
    MissingType,
}

/// Top-level relay error.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Handshake rejected.
    #[error("handshake rejected: {0}")]
    Handshake(#[from] HandshakeError),

    /// Malformed inbound frame.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Socket-level failure reported by the transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// A second driver tried to bind while the first is still open.
    #[error("a driver is already connected to channel '{channel_id}'")]
    DriverAlreadyBound {
        /// Channel that already has a driver.
        channel_id: ChannelId,
    },
}

impl RelayError {
    /// Close code to send to the offending peer, if the error closes it.
    pub const fn close_code(&self) -> Option<CloseCode> {
        match self {
            Self::Handshake(e) => Some(e.close_code()),
            Self::DriverAlreadyBound { .. } => Some(CloseCode::TryAgainLater),
            Self::Protocol(_) | Self::Transport(_) => None,
        }
    }
}
