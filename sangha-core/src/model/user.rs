use crate::model::peer::PeerId;
use serde::{Deserialize, Serialize};

/// Roster entry for one participant of the room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerUser {
    pub peer_id: PeerId,
    pub nick_name: String,
    pub is_ready: bool,
    pub round_score: f32,
    pub total_score: i32,
}

impl PeerUser {
    pub fn new(peer_id: PeerId, nick_name: impl Into<String>) -> Self {
        Self {
            peer_id,
            nick_name: nick_name.into(),
            is_ready: false,
            round_score: 0.0,
            total_score: 0,
        }
    }

    /// Records the score a peer reported for the round that just ended.
    pub fn apply_round_score(&mut self, score: f32) {
        self.round_score = score;
        self.total_score += score.round() as i32;
    }
}
