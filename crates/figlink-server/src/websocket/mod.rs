//! WebSocket transport: upgrade and handshake, the per-connection pump, and
//! heartbeat liveness.

pub mod heartbeat;
pub mod session;
pub mod upgrade;
