use crate::model::PeerId;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The signaling transport is not connected.
    #[error("signaling transport is not connected")]
    NotConnected,

    /// A signaling message refers to a peer without a local connection.
    #[error("no connection for peer {0}")]
    UnknownPeer(PeerId),

    /// Malformed JSON or base64 payload.
    #[error("failed to decode payload: {0}")]
    DecodeError(String),

    /// Completeness check passed but a chunk index is missing.
    #[error("reassembly aborted: chunk {missing} of {total} is missing")]
    ReassemblyAborted { missing: u32, total: u32 },

    /// The data channel to the peer is not open.
    #[error("data channel to {0} is not open")]
    ChannelClosed(PeerId),

    /// Applying or creating an SDP description or ICE candidate failed.
    #[error("negotiation with {peer_id} failed: {reason}")]
    NegotiationFailed { peer_id: PeerId, reason: String },

    #[error("local peer id was not resolved in time")]
    IdentityUnavailable,

    #[error("session is closed")]
    SessionClosed,
}

impl SessionError {
    pub fn negotiation(peer_id: &PeerId, err: impl std::fmt::Display) -> Self {
        Self::NegotiationFailed {
            peer_id: peer_id.clone(),
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        Self::DecodeError(e.to_string())
    }
}
