use crate::SessionError;
use crate::model::chunk::ImageChunkMessage;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Payloads carried over a peer data channel as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PeerMessage {
    ImageChunk(ImageChunkMessage),
    ScoreUpdate { score: f32, time: f32 },
}

impl PeerMessage {
    pub fn decode(data: &[u8]) -> Result<Self, SessionError> {
        Ok(serde_json::from_slice(data)?)
    }

    pub fn encode(&self) -> Result<Bytes, SessionError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}
