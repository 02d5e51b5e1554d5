//! # figlink-server
//!
//! Axum HTTP + `WebSocket` front end for the figlink relay.
//!
//! - `GET /ws`: handshake from headers, then one pump per connection
//! - `POST /api/trigger-actionpoint`: external trigger broadcast to plugins
//! - `GET /health`, `GET /metrics`, optional static file fallback
//! - Heartbeat pings with liveness timeout
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod trigger;
pub mod websocket;

pub use config::ServerConfig;
pub use server::{AppState, RelayServer};
pub use shutdown::ShutdownCoordinator;
