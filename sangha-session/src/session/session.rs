use crate::codec::{
    CompletedImage, ImageOutbox, ImageReceiver, ImageRecompressor, ImageSender, Passthrough,
};
use crate::config::SessionConfig;
use crate::peer::{PeerEvent, PeerManager, PeerManagerHandle};
use crate::session::{
    IdentityProvider, SessionCommand, SessionEvent, SessionHandle, resolve_identity,
};
use crate::signaling::{SignalingChannel, SignalingOutput, SignalingService, StompSignalingChannel};
use crate::transport::{RtcTransportFactory, TransportConfig, TransportFactory};
use anyhow::Context;
use bytes::Bytes;
use sangha_core::{PeerId, PeerMessage, PeerUser, SessionError, SignalMessage};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// Assembles a session from its collaborators.
///
/// Signaling defaults to STOMP over WebSocket and transports to `webrtc`;
/// only the identity provider is mandatory.
pub struct SessionBuilder {
    config: SessionConfig,
    identity: Option<Arc<dyn IdentityProvider>>,
    channel: Option<Arc<dyn SignalingChannel>>,
    factory: Option<Arc<dyn TransportFactory>>,
    recompressor: Arc<dyn ImageRecompressor>,
}

impl SessionBuilder {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            identity: None,
            channel: None,
            factory: None,
            recompressor: Arc::new(Passthrough),
        }
    }

    pub fn identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn signaling_channel(mut self, channel: Arc<dyn SignalingChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn recompressor(mut self, recompressor: Arc<dyn ImageRecompressor>) -> Self {
        self.recompressor = recompressor;
        self
    }

    /// Spawns the coordinator. Intents issued on the returned handle are
    /// queued until the local peer id is resolved.
    pub fn start(self) -> anyhow::Result<SessionHandle> {
        self.config.validate()?;
        let identity = self
            .identity
            .context("an identity provider is required to start a session")?;

        let channel = match self.channel {
            Some(channel) => channel,
            None => Arc::new(StompSignalingChannel::new(self.config.signaling.clone())),
        };
        let factory = match self.factory {
            Some(factory) => factory,
            None => Arc::new(
                RtcTransportFactory::new(TransportConfig::new(
                    self.config.effective_ice_servers(),
                ))
                .context("failed to initialise the WebRTC engine")?,
            ),
        };

        let (command_tx, command_rx) = mpsc::channel(64);
        let (events, _) = broadcast::channel(256);
        let (roster_tx, roster_rx) = watch::channel(Vec::new());
        let (local_tx, local_rx) = watch::channel(None);

        let setup = SessionSetup {
            config: self.config,
            identity,
            channel,
            factory,
            recompressor: self.recompressor,
            events: events.clone(),
            roster: roster_tx,
            local_id: local_tx,
        };
        tokio::spawn(setup.run(command_rx));

        Ok(SessionHandle::new(command_tx, events, roster_rx, local_rx))
    }
}

struct SessionSetup {
    config: SessionConfig,
    identity: Arc<dyn IdentityProvider>,
    channel: Arc<dyn SignalingChannel>,
    factory: Arc<dyn TransportFactory>,
    recompressor: Arc<dyn ImageRecompressor>,
    events: broadcast::Sender<SessionEvent>,
    roster: watch::Sender<Vec<PeerUser>>,
    local_id: watch::Sender<Option<PeerId>>,
}

impl SessionSetup {
    async fn run(self, commands: mpsc::Receiver<SessionCommand>) {
        let local_id =
            match resolve_identity(self.identity.as_ref(), self.config.identity_timeout()).await {
                Ok(id) => id,
                Err(e) => {
                    error!("Session not started: {}", e);
                    let _ = self.events.send(SessionEvent::Stopped);
                    return;
                }
            };
        self.local_id.send_replace(Some(local_id.clone()));

        let inbound = match self.channel.connect().await {
            Ok(rx) => Some(rx),
            Err(e) => {
                warn!("Signaling unavailable at startup: {}", e);
                None
            }
        };

        let signaling = Arc::new(SignalingService::new(
            self.channel.clone(),
            self.config.signaling.clone(),
        ));
        let (peers, peer_events, _) =
            PeerManager::spawn(local_id.clone(), self.factory, signaling.clone());
        let (images, completed, _) = ImageReceiver::spawn(self.config.image.reassembly_timeout());
        let sender = ImageSender::new(peers.data().clone(), &self.config.image)
            .with_recompressor(self.recompressor);
        let (outbox, _) = ImageOutbox::spawn(sender);
        let (reconnected_tx, reconnected) = mpsc::unbounded_channel();

        let mut roster = BTreeMap::new();
        roster.insert(
            local_id.clone(),
            PeerUser::new(local_id.clone(), self.config.nick_name.clone()),
        );

        let coordinator = SessionCoordinator {
            local_id,
            channel: self.channel,
            signaling,
            peers,
            images,
            outbox,
            reconnected_tx,
            roster,
            roster_tx: self.roster,
            events: self.events,
        };
        coordinator
            .run(commands, inbound, reconnected, peer_events, completed)
            .await;
    }
}

/// A fresh inbound stream and the caller waiting for it.
type Reconnected = (
    mpsc::Receiver<String>,
    oneshot::Sender<Result<(), SessionError>>,
);

/// Owns the roster and routes signaling, peer and image traffic.
pub struct SessionCoordinator {
    local_id: PeerId,
    channel: Arc<dyn SignalingChannel>,
    signaling: Arc<SignalingService>,
    peers: PeerManagerHandle,
    images: ImageReceiver,
    outbox: ImageOutbox,
    reconnected_tx: mpsc::UnboundedSender<Reconnected>,
    roster: BTreeMap<PeerId, PeerUser>,
    roster_tx: watch::Sender<Vec<PeerUser>>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionCoordinator {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
        mut inbound: Option<mpsc::Receiver<String>>,
        mut reconnected: mpsc::UnboundedReceiver<Reconnected>,
        mut peer_events: mpsc::UnboundedReceiver<PeerEvent>,
        mut completed: mpsc::UnboundedReceiver<CompletedImage>,
    ) {
        info!("Session for {} started", self.local_id);
        self.publish_roster();
        self.emit(SessionEvent::Started {
            local_id: self.local_id.clone(),
        });

        loop {
            tokio::select! {
                cmd = commands.recv() => {
                    match cmd {
                        Some(c) => {
                            if let Some(done) = self.handle_command(c).await {
                                self.shutdown(true).await;
                                let _ = done.send(());
                                return;
                            }
                        }
                        None => {
                            info!("All session handles dropped");
                            break;
                        }
                    }
                }

                frame = recv_frame(&mut inbound) => {
                    match frame {
                        Some(text) => self.handle_signal(&text).await,
                        None => {
                            warn!("Signaling stream ended");
                            inbound = None;
                        }
                    }
                }

                Some((rx, reply)) = reconnected.recv() => {
                    inbound = Some(rx);
                    info!("Signaling stream re-established");
                    let _ = reply.send(Ok(()));
                }

                Some(evt) = peer_events.recv() => self.handle_peer_event(evt),

                Some(image) = completed.recv() => {
                    self.emit(SessionEvent::ImageCompleted {
                        from: image.from,
                        data: image.data,
                    });
                }
            }
        }

        self.shutdown(false).await;
    }

    /// Returns the completion sender when the command asks the session to exit.
    async fn handle_command(&mut self, cmd: SessionCommand) -> Option<oneshot::Sender<()>> {
        match cmd {
            SessionCommand::Initiate { peer_id, reply } => {
                let _ = reply.send(self.peers.initiate(peer_id).await);
            }

            SessionCommand::SetReady { is_ready, reply } => {
                let local_id = self.local_id.clone();
                self.update_user(&local_id, |user| user.is_ready = is_ready);
                let result = self
                    .signaling
                    .send_signal(SignalMessage::UserReady {
                        peer_id: local_id,
                        is_ready,
                    })
                    .await;
                let _ = reply.send(result);
            }

            SessionCommand::SendImage {
                target,
                image,
                reply,
            } => self.outbox.submit(target, image, reply),

            SessionCommand::SendScore { score, time, reply } => {
                let local_id = self.local_id.clone();
                self.update_user(&local_id, |user| user.apply_round_score(score));
                let result = PeerMessage::ScoreUpdate { score, time }
                    .encode()
                    .map(|data| self.peers.broadcast_data(data));
                let _ = reply.send(result);
            }

            SessionCommand::ConnectionState { peer_id, reply } => {
                let peers = self.peers.clone();
                tokio::spawn(async move {
                    let _ = reply.send(peers.state(peer_id).await);
                });
            }

            SessionCommand::ReconnectSignaling { reply } => {
                // The handshake can take up to the connect timeout; the new
                // stream is installed by the main loop.
                let channel = self.channel.clone();
                let reconnected = self.reconnected_tx.clone();
                tokio::spawn(async move {
                    match channel.connect().await {
                        Ok(rx) => {
                            let _ = reconnected.send((rx, reply));
                        }
                        Err(e) => {
                            warn!("Signaling reconnect failed: {}", e);
                            let _ = reply.send(Err(e));
                        }
                    }
                });
            }

            SessionCommand::Exit { done } => return Some(done),
        }
        None
    }

    async fn handle_signal(&mut self, text: &str) {
        let msg = match SignalMessage::decode(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Dropping malformed signaling frame: {}", e);
                return;
            }
        };

        if let Some(to) = msg.to_peer_id()
            && *to != self.local_id
        {
            debug!("Ignoring {} addressed to {}", msg.kind(), to);
            return;
        }

        let result = match msg {
            SignalMessage::Offer {
                from_peer_id, sdp, ..
            } => self.peers.on_offer(from_peer_id, sdp).await,

            SignalMessage::Answer {
                from_peer_id, sdp, ..
            } => self.peers.on_answer(from_peer_id, sdp).await,

            SignalMessage::IceCandidate {
                from_peer_id,
                candidate,
                ..
            } => self.peers.on_candidate(from_peer_id, candidate).await,

            SignalMessage::RoomPeers { peer_ids } => {
                let mut result = Ok(());
                for peer_id in peer_ids {
                    if peer_id == self.local_id {
                        continue;
                    }
                    self.roster
                        .entry(peer_id.clone())
                        .or_insert_with(|| PeerUser::new(peer_id.clone(), ""));
                    if self.local_id.initiates_to(&peer_id) {
                        result = result.and(self.peers.initiate(peer_id).await);
                    }
                }
                self.publish_roster();
                result
            }

            SignalMessage::UserJoined {
                peer_id,
                user_nick_name,
            } => {
                if peer_id == self.local_id {
                    return;
                }
                info!("{} ({}) joined the room", peer_id, user_nick_name);
                self.roster
                    .entry(peer_id.clone())
                    .and_modify(|user| user.nick_name = user_nick_name.clone())
                    .or_insert_with(|| PeerUser::new(peer_id.clone(), user_nick_name));
                self.publish_roster();

                if self.local_id.initiates_to(&peer_id) {
                    self.peers.initiate(peer_id).await
                } else {
                    debug!("Waiting for {} to send the offer", peer_id);
                    Ok(())
                }
            }

            SignalMessage::UserLeft { peer_id } => {
                if peer_id == self.local_id {
                    return;
                }
                info!("{} left the room", peer_id);
                if self.roster.remove(&peer_id).is_some() {
                    self.publish_roster();
                }
                self.peers.close(peer_id).await
            }

            SignalMessage::UserReady { peer_id, is_ready } => {
                self.update_user(&peer_id, |user| user.is_ready = is_ready);
                Ok(())
            }

            SignalMessage::RoundStart => {
                for user in self.roster.values_mut() {
                    user.round_score = 0.0;
                }
                self.publish_roster();
                self.emit(SessionEvent::RoundStarted);
                Ok(())
            }

            SignalMessage::RoundEnd => {
                self.emit(SessionEvent::RoundEnded);
                Ok(())
            }

            SignalMessage::RequestPhoto { .. } => {
                self.emit(SessionEvent::PhotoRequested);
                Ok(())
            }

            SignalMessage::Unknown => {
                debug!("Dropping signaling message of unknown type");
                Ok(())
            }
        };

        if let Err(e) = result {
            error!("Peer manager unavailable: {}", e);
        }
    }

    fn handle_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::StateChanged(peer_id, state) => {
                self.emit(SessionEvent::ConnectionStateChanged { peer_id, state });
            }

            PeerEvent::ChannelStateChanged(peer_id, state) => {
                self.emit(SessionEvent::DataChannelStateChanged { peer_id, state });
            }

            PeerEvent::Data(peer_id, data) => self.handle_peer_data(peer_id, data),
        }
    }

    fn handle_peer_data(&mut self, peer_id: PeerId, data: Bytes) {
        match PeerMessage::decode(&data) {
            Ok(PeerMessage::ImageChunk(chunk)) => self.images.push(peer_id, chunk),
            Ok(PeerMessage::ScoreUpdate { score, time }) => {
                debug!("{} scored {} at {}s", peer_id, score, time);
                self.update_user(&peer_id, |user| user.apply_round_score(score));
            }
            Err(e) => debug!("Dropping data from {}: {}", peer_id, e),
        }
    }

    async fn shutdown(&mut self, announce: bool) {
        info!("Stopping session for {}", self.local_id);

        if announce
            && let Err(e) = self
                .signaling
                .send_signal(SignalMessage::UserLeft {
                    peer_id: self.local_id.clone(),
                })
                .await
        {
            warn!("Could not announce leaving: {}", e);
        }

        if let Err(e) = self.peers.close_all().await {
            debug!("Peer manager already stopped: {}", e);
        }
        self.images.clear();
        self.channel.disconnect().await;

        self.emit(SessionEvent::Stopped);
        info!("Session for {} stopped", self.local_id);
    }

    /// Applies `update` if the peer is on the roster; unknown peers are ignored.
    fn update_user(&mut self, peer_id: &PeerId, update: impl FnOnce(&mut PeerUser)) {
        let Some(user) = self.roster.get_mut(peer_id) else {
            debug!("Ignoring update for {} who is not on the roster", peer_id);
            return;
        };
        update(user);
        self.publish_roster();
    }

    fn publish_roster(&self) {
        self.roster_tx
            .send_replace(self.roster.values().cloned().collect());
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

async fn recv_frame(inbound: &mut Option<mpsc::Receiver<String>>) -> Option<String> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
