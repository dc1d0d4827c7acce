mod codec;
mod config;
mod peer;
mod session;
mod signaling;
mod transport;

pub use codec::*;
pub use config::*;
pub use peer::*;
pub use session::*;
pub use signaling::*;
pub use transport::*;

pub use sangha_core::{
    DataChannelState, IceCandidate, IceServerConfig, ImageChunkMessage, PeerConnectionState,
    PeerId, PeerMessage, PeerUser, SessionError, SignalMessage,
};
