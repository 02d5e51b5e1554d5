//! # figlink-core
//!
//! Channel registry, routing engine, and handshake resolution for the
//! figlink relay.
//!
//! The relay bridges two classes of long-lived connections per tenant
//! channel: any number of Figma **plugin** sessions and at most one hardware
//! **driver** session. This crate holds everything that has invariants and
//! no transport:
//!
//! - **Branded IDs**: [`SessionId`], [`ChannelId`]
//! - **Handshake**: [`Role`] and [`resolve_handshake`] turn connection
//!   metadata into a validated `(role, channel)` pair or a rejection
//! - **Wire unit**: [`Envelope`] `{type, payload}` codec
//! - **Sessions**: [`ClientSession`] with Open → Closed lifecycle and an
//!   outbound queue drained by the transport
//! - **Routing**: [`Channel`] (at-most-one-driver, plugin broadcast) and the
//!   process-wide [`ChannelRegistry`]
//! - **Errors**: [`RelayError`] taxonomy mapped to WebSocket close codes

#![deny(unsafe_code)]

pub mod channel;
pub mod close;
pub mod envelope;
pub mod errors;
pub mod handshake;
pub mod ids;
pub mod logging;
pub mod registry;
pub mod session;

pub use channel::{Channel, Delivery};
pub use close::{CloseCode, CloseFrame};
pub use envelope::Envelope;
pub use errors::{HandshakeError, ProtocolError, RelayError};
pub use handshake::{ResolvedHandshake, Role, resolve_handshake};
pub use ids::{ChannelId, SessionId};
pub use registry::ChannelRegistry;
pub use session::{ClientSession, Outbound, OutboundReceiver};
