mod chunk;
mod packet;
mod peer;
mod signaling;
mod state;
mod user;

pub use chunk::ImageChunkMessage;
pub use packet::PeerMessage;
pub use peer::PeerId;
pub use signaling::{IceCandidate, IceServerConfig, SignalMessage};
pub use state::{DataChannelState, PeerConnectionState};
pub use user::PeerUser;
