//! Heartbeat liveness accounting.
//!
//! The writer side sends a Ping every interval; any inbound frame or Pong
//! marks the session alive. This loop only counts missed intervals.

use std::sync::Arc;
use std::time::Duration;

use figlink_core::ClientSession;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Close reason sent to a peer that stopped answering pings.
pub const HEARTBEAT_TIMEOUT_REASON: &str = "heartbeat timeout";

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The peer stayed silent for the whole timeout window.
    TimedOut,
    /// The connection ended or the server is shutting down.
    Cancelled,
}

/// Consecutive silent intervals tolerated: `timeout / interval`, at least 1.
pub fn max_missed(interval: Duration, timeout: Duration) -> u32 {
    let interval_ms = interval.as_millis().max(1);
    u32::try_from(timeout.as_millis() / interval_ms)
        .unwrap_or(u32::MAX)
        .max(1)
}

/// Watch `session` until it misses too many intervals or `cancel` fires.
pub async fn run_heartbeat(
    session: Arc<ClientSession>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let max_missed = max_missed(interval, timeout);
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut missed: u32 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if session.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        return HeartbeatResult::TimedOut;
                    }
                }
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}
