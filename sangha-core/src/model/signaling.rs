use crate::SessionError;
use crate::model::peer::PeerId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default)]
    pub sdp_m_line_index: u16,
    pub sdp_candidate: String,
}

/// Frames exchanged with the rendezvous server, discriminated by `type`.
///
/// Unrecognised `type` values decode to [`SignalMessage::Unknown`] so a newer
/// server cannot break the inbound stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SignalMessage {
    #[serde(rename = "offer", rename_all = "camelCase")]
    Offer {
        from_peer_id: PeerId,
        to_peer_id: PeerId,
        sdp: String,
    },
    #[serde(rename = "answer", rename_all = "camelCase")]
    Answer {
        from_peer_id: PeerId,
        to_peer_id: PeerId,
        sdp: String,
    },
    #[serde(rename = "candidate", rename_all = "camelCase")]
    IceCandidate {
        from_peer_id: PeerId,
        to_peer_id: PeerId,
        candidate: IceCandidate,
    },
    #[serde(rename = "room_peers", rename_all = "camelCase")]
    RoomPeers { peer_ids: Vec<PeerId> },
    #[serde(rename = "user_joined", rename_all = "camelCase")]
    UserJoined {
        peer_id: PeerId,
        #[serde(default)]
        user_nick_name: String,
    },
    #[serde(rename = "user_left", rename_all = "camelCase")]
    UserLeft { peer_id: PeerId },
    #[serde(rename = "user_ready", rename_all = "camelCase")]
    UserReady { peer_id: PeerId, is_ready: bool },
    #[serde(rename = "round_start")]
    RoundStart,
    #[serde(rename = "round_end")]
    RoundEnd,
    #[serde(rename = "request_photo", rename_all = "camelCase")]
    RequestPhoto { to_peer_id: PeerId },
    #[serde(other)]
    Unknown,
}

impl SignalMessage {
    pub fn decode(text: &str) -> Result<Self, SessionError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> Result<String, SessionError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Recipient of a directed message; `None` for room-scoped messages.
    pub fn to_peer_id(&self) -> Option<&PeerId> {
        match self {
            Self::Offer { to_peer_id, .. }
            | Self::Answer { to_peer_id, .. }
            | Self::IceCandidate { to_peer_id, .. }
            | Self::RequestPhoto { to_peer_id } => Some(to_peer_id),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "candidate",
            Self::RoomPeers { .. } => "room_peers",
            Self::UserJoined { .. } => "user_joined",
            Self::UserLeft { .. } => "user_left",
            Self::UserReady { .. } => "user_ready",
            Self::RoundStart => "round_start",
            Self::RoundEnd => "round_end",
            Self::RequestPhoto { .. } => "request_photo",
            Self::Unknown => "unknown",
        }
    }
}
