use crate::transport::{ConnectionKey, TransportEvent};
use async_trait::async_trait;
use bytes::Bytes;
use sangha_core::{DataChannelState, IceCandidate};
use tokio::sync::mpsc;

/// One negotiated connection to a remote peer.
///
/// Implementations report everything asynchronous (state, channel, inbound
/// bytes, local candidates) on the event sender they were created with.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Creates the ordered data channel, then the offer, and applies it locally.
    async fn create_offer(&self) -> anyhow::Result<String>;

    /// Applies a remote offer and returns the local answer.
    async fn accept_offer(&self, sdp: String) -> anyhow::Result<String>;

    async fn apply_answer(&self, sdp: String) -> anyhow::Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> anyhow::Result<()>;

    async fn close(&self) -> anyhow::Result<()>;
}

/// Send half of an open data channel.
#[async_trait]
pub trait DataLink: Send + Sync {
    fn state(&self) -> DataChannelState;

    async fn send(&self, data: &Bytes) -> anyhow::Result<()>;

    async fn close(&self) -> anyhow::Result<()>;
}

/// Builds transports. Expensive engine setup happens once, in the factory.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        key: ConnectionKey,
        events: mpsc::Sender<TransportEvent>,
    ) -> anyhow::Result<Box<dyn PeerTransport>>;
}
