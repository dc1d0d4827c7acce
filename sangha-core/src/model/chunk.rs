use crate::SessionError;
use serde::{Deserialize, Serialize};

/// One slice of an encoded image on the data channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageChunkMessage {
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub data_base64: String,
    /// Sender-chosen id shared by every chunk of one image. Senders that
    /// omit it get strict chunk-0-first reassembly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<u64>,
}

impl ImageChunkMessage {
    /// Checks `0 <= chunk_index < total_chunks`.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.total_chunks == 0 {
            return Err(SessionError::DecodeError("totalChunks must be at least 1".into()));
        }
        if self.chunk_index >= self.total_chunks {
            return Err(SessionError::DecodeError(format!(
                "chunkIndex {} out of range for totalChunks {}",
                self.chunk_index, self.total_chunks
            )));
        }
        Ok(())
    }
}
