use crate::transport::DataLink;
use bytes::Bytes;
use sangha_core::{IceCandidate, PeerConnectionState, PeerId};
use std::fmt;
use std::sync::Arc;

/// Identifies one connection object. A peer that is renegotiated gets a new
/// generation, so late callbacks from the old object can be told apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub peer_id: PeerId,
    pub generation: u64,
}

impl ConnectionKey {
    pub fn new(peer_id: PeerId, generation: u64) -> Self {
        Self {
            peer_id,
            generation,
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.peer_id, self.generation)
    }
}

/// Events a transport pushes to the peer manager loop.
pub enum TransportEvent {
    /// ICE connectivity changed.
    StateChanged(ConnectionKey, PeerConnectionState),

    /// The data channel opened and can carry traffic.
    ChannelReady(ConnectionKey, Arc<dyn DataLink>),

    ChannelClosed(ConnectionKey),

    /// Binary payload received on the data channel.
    Message(ConnectionKey, Bytes),

    /// A local candidate was gathered and has to reach the remote side.
    CandidateGenerated(ConnectionKey, IceCandidate),
}

impl TransportEvent {
    pub fn key(&self) -> &ConnectionKey {
        match self {
            Self::StateChanged(key, _)
            | Self::ChannelReady(key, _)
            | Self::ChannelClosed(key)
            | Self::Message(key, _)
            | Self::CandidateGenerated(key, _) => key,
        }
    }
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StateChanged(key, state) => write!(f, "StateChanged({key}, {state:?})"),
            Self::ChannelReady(key, _) => write!(f, "ChannelReady({key})"),
            Self::ChannelClosed(key) => write!(f, "ChannelClosed({key})"),
            Self::Message(key, data) => write!(f, "Message({key}, {} bytes)", data.len()),
            Self::CandidateGenerated(key, _) => write!(f, "CandidateGenerated({key})"),
        }
    }
}
