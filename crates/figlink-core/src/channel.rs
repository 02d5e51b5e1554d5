//! Per-tenant routing unit.
//!
//! A [`Channel`] holds the plugin sessions and the optional driver session
//! for one channel id. Membership is the only state: there are no named
//! states, and every mutation happens under the channel's own lock.
//!
//! Forwarding policy:
//! - plugin → the bound driver (dropped with a log line when none is bound)
//! - driver → every Open plugin (broadcast)
//!
//! [`Channel::route`] computes deliveries without doing any I/O;
//! [`Channel::dispatch`] executes them.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::close::CloseCode;
use crate::envelope::Envelope;
use crate::errors::RelayError;
use crate::handshake::Role;
use crate::ids::{ChannelId, SessionId};
use crate::session::ClientSession;

/// Reason sent with the 1013 close when a second driver shows up.
pub const DRIVER_CONFLICT_REASON: &str =
    "a driver is already connected to this channel, try again later";

/// One planned delivery: who gets which envelope.
#[derive(Clone, Debug)]
pub struct Delivery {
    /// Recipient session.
    pub target: Arc<ClientSession>,
    /// Envelope to deliver, unmodified. Shared across one plan.
    pub envelope: Arc<Envelope>,
}

#[derive(Default)]
struct Members {
    plugins: HashMap<SessionId, Arc<ClientSession>>,
    driver: Option<Arc<ClientSession>>,
}

/// Routing unit for one channel id.
pub struct Channel {
    id: ChannelId,
    members: Mutex<Members>,
}

impl Channel {
    /// Create an empty channel.
    pub fn new(id: ChannelId) -> Self {
        info!(channel_id = %id, "channel created");
        Self {
            id,
            members: Mutex::new(Members::default()),
        }
    }

    /// Channel id.
    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    /// Register a freshly accepted session under its resolved role.
    pub fn register(&self, session: Arc<ClientSession>) -> Result<(), RelayError> {
        match session.role() {
            Role::Plugin => {
                let _ = self.add_plugin_client(session);
                Ok(())
            }
            Role::Driver => self.set_driver_client(session),
        }
    }

    /// Add a plugin session. A repeated registration is a logged no-op.
    ///
    /// Returns whether the session was newly inserted.
    pub fn add_plugin_client(&self, session: Arc<ClientSession>) -> bool {
        let mut members = self.members.lock();
        if members.plugins.contains_key(session.id()) {
            warn!(channel_id = %self.id, client_id = %session.id(), "plugin already registered");
            return false;
        }
        let client_id = session.id().clone();
        let _ = members.plugins.insert(client_id.clone(), session);
        info!(
            channel_id = %self.id,
            %client_id,
            plugins = members.plugins.len(),
            "plugin registered"
        );
        true
    }

    /// Bind the channel's driver.
    ///
    /// If an Open driver is already bound, the newcomer is closed with
    /// 1013 and the existing driver is left alone. A Closed leftover is
    /// replaced.
    pub fn set_driver_client(&self, session: Arc<ClientSession>) -> Result<(), RelayError> {
        let mut members = self.members.lock();
        if let Some(existing) = members.driver.as_ref() {
            if existing.is_open() {
                warn!(
                    channel_id = %self.id,
                    existing = %existing.id(),
                    rejected = %session.id(),
                    "driver already bound, rejecting new driver"
                );
                drop(members);
                let _ = session.close(CloseCode::TryAgainLater, DRIVER_CONFLICT_REASON);
                return Err(RelayError::DriverAlreadyBound {
                    channel_id: self.id.clone(),
                });
            }
            debug!(channel_id = %self.id, stale = %existing.id(), "replacing closed driver");
        }
        info!(channel_id = %self.id, client_id = %session.id(), "driver bound");
        members.driver = Some(session);
        Ok(())
    }

    /// Remove a plugin session by identity.
    pub fn remove_plugin_client(&self, session_id: &SessionId) -> bool {
        let mut members = self.members.lock();
        let removed = members.plugins.remove(session_id).is_some();
        if removed {
            info!(
                channel_id = %self.id,
                client_id = %session_id,
                plugins = members.plugins.len(),
                "plugin removed"
            );
        }
        removed
    }

    /// Unbind the driver, but only if `session_id` is the bound driver.
    pub fn clear_driver_client(&self, session_id: &SessionId) -> bool {
        let mut members = self.members.lock();
        if members.driver.as_ref().is_some_and(|d| d.id() == session_id) {
            members.driver = None;
            info!(channel_id = %self.id, client_id = %session_id, "driver removed");
            true
        } else {
            false
        }
    }

    /// Remove a session from wherever it actually resides.
    pub fn remove_session(&self, session: &ClientSession) -> bool {
        self.remove_plugin_client(session.id()) || self.clear_driver_client(session.id())
    }

    /// Plan deliveries for an envelope sent by `source`. No I/O.
    ///
    /// A plugin's envelope goes to the bound driver if it is Open. A
    /// driver's envelope goes to every Open plugin, provided the source is
    /// the bound driver; anything else routes nowhere. Every delivery
    /// shares one envelope allocation.
    pub fn route(&self, source: &ClientSession, envelope: &Envelope) -> Vec<Delivery> {
        Self::plan(self.targets(Some(source)), envelope)
    }

    /// Route and send an envelope from `source`. Returns the number of
    /// sessions it was handed to.
    pub fn dispatch(&self, source: &ClientSession, envelope: &Envelope) -> usize {
        let deliveries = self.route(source, envelope);
        if deliveries.is_empty() {
            self.log_dropped(Some(source), envelope);
            return 0;
        }
        self.deliver(&deliveries)
    }

    /// Forward a plugin's envelope to the bound driver.
    ///
    /// With no Open driver the envelope is dropped; this is not an error.
    pub fn route_plugin_message(&self, source: &ClientSession, envelope: &Envelope) -> bool {
        self.dispatch(source, envelope) > 0
    }

    /// Broadcast a driver's envelope to every Open plugin.
    pub fn route_driver_message(&self, source: &ClientSession, envelope: &Envelope) -> usize {
        self.dispatch(source, envelope)
    }

    /// Broadcast to plugins on behalf of a producer outside the channel
    /// (the HTTP trigger).
    pub fn broadcast_to_plugins(&self, envelope: &Envelope) -> usize {
        let deliveries = Self::plan(self.targets(None), envelope);
        if deliveries.is_empty() {
            self.log_dropped(None, envelope);
            return 0;
        }
        self.deliver(&deliveries)
    }

    fn plan(targets: Vec<Arc<ClientSession>>, envelope: &Envelope) -> Vec<Delivery> {
        if targets.is_empty() {
            return Vec::new();
        }
        let shared = Arc::new(envelope.clone());
        targets
            .into_iter()
            .map(|target| Delivery {
                target,
                envelope: Arc::clone(&shared),
            })
            .collect()
    }

    /// Send planned deliveries, encoding each distinct envelope once.
    fn deliver(&self, deliveries: &[Delivery]) -> usize {
        let mut encoded: Option<(&Arc<Envelope>, Arc<str>)> = None;
        let mut recipients = 0;
        for delivery in deliveries {
            let cached = encoded
                .as_ref()
                .filter(|(env, _)| Arc::ptr_eq(env, &delivery.envelope))
                .map(|(_, frame)| frame.clone());
            let frame = if let Some(frame) = cached {
                frame
            } else {
                match delivery.envelope.encode() {
                    Ok(json) => {
                        let frame: Arc<str> = Arc::from(json);
                        encoded = Some((&delivery.envelope, frame.clone()));
                        frame
                    }
                    Err(e) => {
                        warn!(
                            channel_id = %self.id,
                            kind = %delivery.envelope.kind,
                            error = %e,
                            "failed to serialize envelope"
                        );
                        continue;
                    }
                }
            };
            let sent = delivery.target.send_raw(frame);
            if sent {
                recipients += 1;
            }
            debug!(
                channel_id = %self.id,
                to = %delivery.target.id(),
                kind = %delivery.envelope.kind,
                sent,
                "envelope forwarded"
            );
        }
        recipients
    }

    fn log_dropped(&self, source: Option<&ClientSession>, envelope: &Envelope) {
        match source {
            Some(s) if s.role() == Role::Plugin => info!(
                channel_id = %self.id,
                from = %s.id(),
                kind = %envelope.kind,
                "no driver connected, plugin message dropped"
            ),
            Some(s) if self.driver_id().as_ref() != Some(s.id()) => warn!(
                channel_id = %self.id,
                client_id = %s.id(),
                "message from unbound driver ignored"
            ),
            _ => info!(
                channel_id = %self.id,
                kind = %envelope.kind,
                "no plugins connected, message dropped"
            ),
        }
    }

    /// Recipients under the forwarding policy. `None` is a producer
    /// outside the channel, which reaches plugins like the bound driver.
    fn targets(&self, source: Option<&ClientSession>) -> Vec<Arc<ClientSession>> {
        let members = self.members.lock();
        let to_plugins = match source {
            None => true,
            Some(s) => match s.role() {
                Role::Plugin => {
                    return members
                        .driver
                        .iter()
                        .filter(|d| d.is_open())
                        .cloned()
                        .collect();
                }
                Role::Driver => members.driver.as_ref().is_some_and(|d| d.id() == s.id()),
            },
        };
        if !to_plugins {
            return Vec::new();
        }
        members
            .plugins
            .values()
            .filter(|p| p.is_open())
            .cloned()
            .collect()
    }

    /// Number of plugin sessions.
    pub fn plugin_count(&self) -> usize {
        self.members.lock().plugins.len()
    }

    /// IDs of the plugin sessions.
    pub fn plugin_ids(&self) -> Vec<SessionId> {
        self.members.lock().plugins.keys().cloned().collect()
    }

    /// ID of the bound driver.
    pub fn driver_id(&self) -> Option<SessionId> {
        self.members.lock().driver.as_ref().map(|d| d.id().clone())
    }

    /// Whether a driver is bound (Open or not yet cleaned up).
    pub fn has_driver(&self) -> bool {
        self.members.lock().driver.is_some()
    }

    /// Total sessions held.
    pub fn session_count(&self) -> usize {
        let members = self.members.lock();
        members.plugins.len() + usize::from(members.driver.is_some())
    }

    /// Whether the channel holds no sessions at all.
    pub fn is_empty(&self) -> bool {
        self.session_count() == 0
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("plugins", &self.plugin_count())
            .field("driver", &self.driver_id())
            .finish()
    }
}
