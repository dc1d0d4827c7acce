use bytes::Bytes;
use sangha_core::{DataChannelState, IceCandidate, PeerConnectionState, PeerId};
use tokio::sync::oneshot;

/// Requests handled by the peer manager loop, one at a time.
#[derive(Debug)]
pub enum PeerCommand {
    /// Open a connection as the offering side.
    Initiate { peer_id: PeerId },

    RemoteOffer { peer_id: PeerId, sdp: String },

    RemoteAnswer { peer_id: PeerId, sdp: String },

    RemoteCandidate {
        peer_id: PeerId,
        candidate: IceCandidate,
    },

    Close { peer_id: PeerId },

    /// Close every connection; `done` fires once all of them are released.
    CloseAll { done: oneshot::Sender<()> },

    State {
        peer_id: PeerId,
        reply: oneshot::Sender<Option<PeerConnectionState>>,
    },
}

/// What the peer manager reports to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    StateChanged(PeerId, PeerConnectionState),
    ChannelStateChanged(PeerId, DataChannelState),
    Data(PeerId, Bytes),
}
