//! Process-wide map from channel id to [`Channel`].
//!
//! Channels are created lazily on first reference. Creation is atomic: two
//! concurrent first connections to the same id always end up in the same
//! `Channel`. Different channel ids never share mutable state.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::channel::Channel;
use crate::errors::RelayError;
use crate::ids::ChannelId;
use crate::session::ClientSession;

/// Registry of live channels.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: DashMap<ChannelId, Arc<Channel>>,
}

impl ChannelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the channel for `id`, creating it if absent.
    pub fn get_or_create(&self, id: &ChannelId) -> Arc<Channel> {
        self.channels
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Channel::new(id.clone())))
            .value()
            .clone()
    }

    /// Register `session` on the channel for `id`, creating the channel if
    /// needed.
    ///
    /// The map entry stays locked while the session registers, so a
    /// concurrent [`evict_if_empty`](Self::evict_if_empty) can't drop the
    /// channel in between.
    pub fn attach(
        &self,
        id: &ChannelId,
        session: Arc<ClientSession>,
    ) -> Result<Arc<Channel>, RelayError> {
        let entry = self
            .channels
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Channel::new(id.clone())));
        entry.register(session)?;
        Ok(Arc::clone(entry.value()))
    }

    /// Look up an existing channel. Never creates.
    pub fn get(&self, id: &ChannelId) -> Option<Arc<Channel>> {
        self.channels.get(id).map(|c| Arc::clone(c.value()))
    }

    /// Drop the channel for `id` if it holds no sessions.
    pub fn evict_if_empty(&self, id: &ChannelId) -> bool {
        let evicted = self.channels.remove_if(id, |_, c| c.is_empty()).is_some();
        if evicted {
            info!(channel_id = %id, "empty channel evicted");
        } else {
            debug!(channel_id = %id, "channel kept");
        }
        evicted
    }

    /// Number of channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether no channel exists.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// IDs of all channels, sorted.
    pub fn channel_ids(&self) -> Vec<ChannelId> {
        let mut ids: Vec<ChannelId> = self.channels.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Sessions held across all channels.
    pub fn session_count(&self) -> usize {
        self.channels.iter().map(|e| e.value().session_count()).sum()
    }

    /// Snapshot of all channels.
    pub fn channels(&self) -> Vec<Arc<Channel>> {
        self.channels.iter().map(|e| Arc::clone(e.value())).collect()
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("channels", &self.len())
            .finish()
    }
}
