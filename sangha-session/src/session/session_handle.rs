use crate::session::{Reply, SessionCommand, SessionEvent};
use bytes::Bytes;
use sangha_core::{PeerConnectionState, PeerId, PeerUser, SessionError};
use tokio::sync::{broadcast, mpsc, oneshot, watch};

/// Entry point for the host application: intents in, observations out.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    events: broadcast::Sender<SessionEvent>,
    roster: watch::Receiver<Vec<PeerUser>>,
    local_id: watch::Receiver<Option<PeerId>>,
}

impl SessionHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<SessionCommand>,
        events: broadcast::Sender<SessionEvent>,
        roster: watch::Receiver<Vec<PeerUser>>,
        local_id: watch::Receiver<Option<PeerId>>,
    ) -> Self {
        Self {
            commands,
            events,
            roster,
            local_id,
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        rx.await.map_err(|_| SessionError::SessionClosed)?
    }

    /// Starts negotiating with `peer_id` as the offering side.
    pub async fn initiate(&self, peer_id: PeerId) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Initiate { peer_id, reply })
            .await
    }

    /// Updates the local ready flag and announces it to the room.
    pub async fn set_ready(&self, is_ready: bool) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::SetReady { is_ready, reply })
            .await
    }

    /// Sends an encoded image to one peer, or to every open channel.
    /// Resolves with the number of chunks once they have been handed over.
    pub async fn send_image(
        &self,
        target: Option<PeerId>,
        image: Bytes,
    ) -> Result<usize, SessionError> {
        self.request(|reply| SessionCommand::SendImage {
            target,
            image,
            reply,
        })
        .await
    }

    /// Broadcasts the local score; returns the number of peers it went to.
    pub async fn send_score(&self, score: f32, time: f32) -> Result<usize, SessionError> {
        self.request(|reply| SessionCommand::SendScore { score, time, reply })
            .await
    }

    pub async fn connection_state(
        &self,
        peer_id: PeerId,
    ) -> Result<Option<PeerConnectionState>, SessionError> {
        self.request(|reply| SessionCommand::ConnectionState { peer_id, reply })
            .await
    }

    pub async fn reconnect_signaling(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::ReconnectSignaling { reply })
            .await
    }

    /// Leaves the room and tears everything down. Resolves once the
    /// coordinator has stopped; calling it again is a no-op.
    pub async fn exit(&self) {
        let (done, rx) = oneshot::channel();
        if self.commands.send(SessionCommand::Exit { done }).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn roster(&self) -> watch::Receiver<Vec<PeerUser>> {
        self.roster.clone()
    }

    pub fn roster_snapshot(&self) -> Vec<PeerUser> {
        self.roster.borrow().clone()
    }

    /// `None` until the identity provider has resolved.
    pub fn local_id(&self) -> Option<PeerId> {
        self.local_id.borrow().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}
