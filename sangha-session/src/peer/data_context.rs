use crate::transport::DataLink;
use bytes::Bytes;
use dashmap::DashMap;
use sangha_core::{PeerId, SessionError};
use std::sync::Arc;
use tracing::{debug, warn};

/// Send access to the open data channels, usable from any task.
///
/// The peer manager inserts a channel when it opens and removes it when it
/// closes; senders never go through the manager loop.
#[derive(Clone, Default)]
pub struct DataContext {
    links: Arc<DashMap<PeerId, Arc<dyn DataLink>>>,
}

impl DataContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, peer_id: PeerId, link: Arc<dyn DataLink>) {
        self.links.insert(peer_id, link);
    }

    pub(crate) fn remove(&self, peer_id: &PeerId) -> Option<Arc<dyn DataLink>> {
        self.links.remove(peer_id).map(|(_, link)| link)
    }

    pub(crate) fn clear(&self) {
        self.links.clear();
    }

    /// Sends to one peer. Fails fast with [`SessionError::ChannelClosed`]
    /// when there is no channel or it is not open.
    pub async fn send(&self, peer_id: &PeerId, data: Bytes) -> Result<(), SessionError> {
        // Clone out of the map so no shard guard is held across the await.
        let link = self.links.get(peer_id).map(|entry| entry.value().clone());
        let Some(link) = link.filter(|link| link.state().is_open()) else {
            debug!("Data channel to {} is not open, dropping {} bytes", peer_id, data.len());
            return Err(SessionError::ChannelClosed(peer_id.clone()));
        };

        link.send(&data).await.map_err(|e| {
            warn!("Failed to send to {}: {}", peer_id, e);
            SessionError::ChannelClosed(peer_id.clone())
        })
    }

    /// Sends to every open channel without waiting for any of them.
    /// Returns the number of peers the payload was handed to.
    pub fn broadcast(&self, data: Bytes) -> usize {
        let channels: Vec<(PeerId, Arc<dyn DataLink>)> = self
            .links
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut delivered = 0;
        for (peer_id, channel) in channels {
            if !channel.state().is_open() {
                debug!("Skipping {} in broadcast, channel not open", peer_id);
                continue;
            }
            delivered += 1;
            let data = data.clone();
            tokio::spawn(async move {
                if let Err(e) = channel.send(&data).await {
                    warn!("Broadcast to {} failed: {}", peer_id, e);
                }
            });
        }
        delivered
    }

    /// Peers whose channel is currently open.
    pub fn open_peers(&self) -> Vec<PeerId> {
        self.links
            .iter()
            .filter(|entry| entry.value().state().is_open())
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.links.contains_key(peer_id)
    }
}
