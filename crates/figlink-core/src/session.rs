//! One accepted connection.
//!
//! A [`ClientSession`] owns the Open → Closed lifecycle and an outbound
//! queue. The transport drains the queue ([`OutboundReceiver`]) and writes
//! frames to the socket; the session itself never touches I/O, so `send`
//! is fire-and-forget and never blocks.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::close::{CloseCode, CloseFrame};
use crate::envelope::Envelope;
use crate::handshake::Role;
use crate::ids::SessionId;

/// Work item for the transport writer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// Serialized envelope to write as a text frame.
    Frame(Arc<str>),
    /// Send a close frame and stop writing.
    Close(CloseFrame),
}

/// Receiving half of a session's outbound queue.
pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;

/// A connected plugin or driver.
pub struct ClientSession {
    id: SessionId,
    role: Role,
    remote_addr: Option<SocketAddr>,
    tx: mpsc::UnboundedSender<Outbound>,
    open: AtomicBool,
    /// When this session was accepted.
    pub connected_at: Instant,
    is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    sent: AtomicU64,
}

impl ClientSession {
    /// Create an Open session and the receiver its transport writer drains.
    pub fn open(role: Role, remote_addr: Option<SocketAddr>) -> (Arc<Self>, OutboundReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let now = Instant::now();
        let session = Self {
            id: SessionId::new(),
            role,
            remote_addr,
            tx,
            open: AtomicBool::new(true),
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            sent: AtomicU64::new(0),
        };
        (Arc::new(session), rx)
    }

    /// Unique connection ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Role resolved at handshake.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Peer address, when the transport knows it.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Log label, e.g. `[Plugin 0190…]`.
    pub fn name(&self) -> String {
        let label = match self.role {
            Role::Plugin => "Plugin",
            Role::Driver => "Driver",
        };
        format!("[{label} {}]", self.id)
    }

    /// Whether the session is still Open.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Serialize and queue an envelope.
    ///
    /// Returns `false` (and logs) when the session is Closed or the
    /// envelope cannot be serialized. Never panics.
    pub fn send(&self, envelope: &Envelope) -> bool {
        if !self.is_open() {
            debug!(client_id = %self.id, kind = %envelope.kind, "session not open, message not sent");
            return false;
        }
        match envelope.encode() {
            Ok(json) => self.send_raw(Arc::from(json)),
            Err(e) => {
                warn!(client_id = %self.id, kind = %envelope.kind, error = %e, "failed to serialize envelope");
                false
            }
        }
    }

    /// Queue an already-encoded frame. Used for fan-out so one encoding is
    /// shared by every recipient.
    pub fn send_raw(&self, frame: Arc<str>) -> bool {
        if !self.is_open() {
            debug!(client_id = %self.id, "session not open, frame not sent");
            return false;
        }
        if self.tx.send(Outbound::Frame(frame)).is_ok() {
            let _ = self.sent.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            debug!(client_id = %self.id, "transport writer gone, frame not sent");
            false
        }
    }

    /// Request a graceful close.
    ///
    /// The first call moves the session to Closed and queues a close frame;
    /// later calls are no-ops. Returns whether this call did the transition.
    pub fn close(&self, code: CloseCode, reason: impl Into<String>) -> bool {
        if !self.open.swap(false, Ordering::AcqRel) {
            return false;
        }
        let frame = CloseFrame::new(code, reason);
        debug!(client_id = %self.id, code = %frame.code, reason = %frame.reason, "closing session");
        let _ = self.tx.send(Outbound::Close(frame));
        true
    }

    /// Record that the transport already went away (peer close or error).
    ///
    /// Same one-way transition as [`close`](Self::close) but queues nothing.
    pub fn mark_closed(&self) -> bool {
        self.open.swap(false, Ordering::AcqRel)
    }

    /// Decode one inbound frame.
    ///
    /// Malformed frames are logged and dropped; the session stays Open and
    /// nothing is sent back to the peer.
    pub fn accept_frame(&self, frame: &[u8]) -> Option<Envelope> {
        match Envelope::decode(frame) {
            Ok(envelope) => {
                if envelope.is_ping() {
                    debug!(client_id = %self.id, "ping received");
                }
                Some(envelope)
            }
            Err(e) => {
                let preview = String::from_utf8_lossy(&frame[..frame.len().min(200)]);
                warn!(client_id = %self.id, error = %e, %preview, "dropping malformed frame");
                None
            }
        }
    }

    /// Frames queued so far.
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Mark the peer as alive (pong or any inbound activity).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the peer was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Duration since the last pong (or acceptance).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Session age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("remote_addr", &self.remote_addr)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}
