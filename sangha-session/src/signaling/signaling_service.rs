use crate::config::SignalingConfig;
use crate::signaling::{SignalingChannel, SignalingOutput};
use async_trait::async_trait;
use sangha_core::{SessionError, SignalMessage};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Serialises signaling messages and routes them to their STOMP destination.
#[derive(Clone)]
pub struct SignalingService {
    channel: Arc<dyn SignalingChannel>,
    config: SignalingConfig,
}

impl SignalingService {
    pub fn new(channel: Arc<dyn SignalingChannel>, config: SignalingConfig) -> Self {
        Self { channel, config }
    }

    pub fn channel(&self) -> &Arc<dyn SignalingChannel> {
        &self.channel
    }

    /// Directed messages go to the recipient's queue, everything else to the room.
    pub fn destination_for(&self, msg: &SignalMessage) -> String {
        match msg.to_peer_id() {
            Some(to) => format!(
                "{}/{}/{}",
                self.config.signal_destination_prefix, self.config.room_id, to
            ),
            None => format!(
                "{}/{}",
                self.config.room_destination_prefix, self.config.room_id
            ),
        }
    }
}

#[async_trait]
impl SignalingOutput for SignalingService {
    async fn send_signal(&self, msg: SignalMessage) -> Result<(), SessionError> {
        let json = msg.encode().inspect_err(|e| {
            error!("Failed to serialize signal message: {}", e);
        })?;
        let destination = self.destination_for(&msg);

        debug!("Sending {} to {}", msg.kind(), destination);
        self.channel
            .send(&destination, json)
            .await
            .inspect_err(|e| warn!("Failed to send {} to {}: {}", msg.kind(), destination, e))
    }
}
