use bytes::Bytes;
use sangha_core::{PeerConnectionState, PeerId, SessionError};
use tokio::sync::oneshot;

pub type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

/// Intents queued to the session coordinator.
///
/// They are accepted before the local id is known and run once it is.
#[derive(Debug)]
pub enum SessionCommand {
    Initiate {
        peer_id: PeerId,
        reply: Reply<()>,
    },

    SetReady {
        is_ready: bool,
        reply: Reply<()>,
    },

    SendImage {
        target: Option<PeerId>,
        image: Bytes,
        reply: Reply<usize>,
    },

    SendScore {
        score: f32,
        time: f32,
        reply: Reply<usize>,
    },

    ConnectionState {
        peer_id: PeerId,
        reply: Reply<Option<PeerConnectionState>>,
    },

    /// Re-opens the signaling stream after it dropped.
    ReconnectSignaling { reply: Reply<()> },

    Exit { done: oneshot::Sender<()> },
}
