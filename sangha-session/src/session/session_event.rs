use bytes::Bytes;
use sangha_core::{DataChannelState, PeerConnectionState, PeerId};

/// Everything observers of a session can see.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Identity resolved and signaling attempted; the session is live.
    Started { local_id: PeerId },

    ConnectionStateChanged {
        peer_id: PeerId,
        state: PeerConnectionState,
    },

    DataChannelStateChanged {
        peer_id: PeerId,
        state: DataChannelState,
    },

    /// A fully reassembled image.
    ImageCompleted { from: PeerId, data: Bytes },

    RoundStarted,

    RoundEnded,

    /// The room asked this peer for its photo.
    PhotoRequested,

    Stopped,
}
