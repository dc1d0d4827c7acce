use async_trait::async_trait;
use sangha_core::{IceCandidate, PeerId, SessionError, SignalMessage};

/// Outbound side of signaling as seen by the peer manager and the coordinator.
#[async_trait]
pub trait SignalingOutput: Send + Sync {
    async fn send_signal(&self, msg: SignalMessage) -> Result<(), SessionError>;

    async fn send_offer(&self, from: PeerId, to: PeerId, sdp: String) -> Result<(), SessionError> {
        self.send_signal(SignalMessage::Offer {
            from_peer_id: from,
            to_peer_id: to,
            sdp,
        })
        .await
    }

    async fn send_answer(&self, from: PeerId, to: PeerId, sdp: String) -> Result<(), SessionError> {
        self.send_signal(SignalMessage::Answer {
            from_peer_id: from,
            to_peer_id: to,
            sdp,
        })
        .await
    }

    async fn send_ice(
        &self,
        from: PeerId,
        to: PeerId,
        candidate: IceCandidate,
    ) -> Result<(), SessionError> {
        self.send_signal(SignalMessage::IceCandidate {
            from_peer_id: from,
            to_peer_id: to,
            candidate,
        })
        .await
    }
}
