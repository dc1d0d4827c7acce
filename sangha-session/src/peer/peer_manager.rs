use crate::peer::{DataContext, PeerCommand, PeerEvent};
use crate::signaling::SignalingOutput;
use crate::transport::{ConnectionKey, PeerTransport, TransportEvent, TransportFactory};
use bytes::Bytes;
use sangha_core::{DataChannelState, IceCandidate, PeerConnectionState, PeerId, SessionError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Offerer,
    Answerer,
}

struct PeerEntry {
    transport: Arc<dyn PeerTransport>,
    generation: u64,
    state: PeerConnectionState,
    role: Role,
    /// The remote description has been applied.
    remote_applied: bool,
}

impl PeerEntry {
    /// Our offer is out and no answer has been applied yet.
    fn offer_pending(&self) -> bool {
        self.role == Role::Offerer && !self.remote_applied && !self.state.is_terminal()
    }
}

/// Actor that owns every peer connection of the session.
///
/// Connection objects are only touched from [`PeerManager::run`]; the rest of
/// the system talks to it through [`PeerManagerHandle`].
pub struct PeerManager {
    local_id: PeerId,
    factory: Arc<dyn TransportFactory>,
    signaling: Arc<dyn SignalingOutput>,
    peers: HashMap<PeerId, PeerEntry>,
    data: DataContext,
    next_generation: u64,
    command_rx: mpsc::Receiver<PeerCommand>,
    transport_rx: mpsc::Receiver<TransportEvent>,
    transport_tx: mpsc::Sender<TransportEvent>,
    events: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerManager {
    /// Starts the manager loop. It stops once every handle is dropped.
    pub fn spawn(
        local_id: PeerId,
        factory: Arc<dyn TransportFactory>,
        signaling: Arc<dyn SignalingOutput>,
    ) -> (
        PeerManagerHandle,
        mpsc::UnboundedReceiver<PeerEvent>,
        JoinHandle<()>,
    ) {
        let (command_tx, command_rx) = mpsc::channel(100);
        let (transport_tx, transport_rx) = mpsc::channel(256);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let data = DataContext::new();

        let manager = Self {
            local_id,
            factory,
            signaling,
            peers: HashMap::new(),
            data: data.clone(),
            next_generation: 0,
            command_rx,
            transport_rx,
            transport_tx,
            events: events_tx,
        };
        let task = tokio::spawn(manager.run());

        (
            PeerManagerHandle {
                commands: command_tx,
                data,
            },
            events_rx,
            task,
        )
    }

    pub async fn run(mut self) {
        info!("Peer manager for {} started", self.local_id);

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(c) => self.handle_command(c).await,
                        None => {
                            info!("All peer manager handles dropped, shutting down");
                            break;
                        }
                    }
                }

                evt = self.transport_rx.recv() => {
                    match evt {
                        Some(e) => self.handle_transport_event(e).await,
                        None => {
                            warn!("Transport channel closed unexpectedly");
                            break;
                        }
                    }
                }
            }
        }

        self.close_all().await;
        info!("Peer manager for {} finished", self.local_id);
    }

    async fn handle_command(&mut self, cmd: PeerCommand) {
        match cmd {
            PeerCommand::Initiate { peer_id } => self.initiate(peer_id).await,
            PeerCommand::RemoteOffer { peer_id, sdp } => self.on_offer(peer_id, sdp).await,
            PeerCommand::RemoteAnswer { peer_id, sdp } => self.on_answer(peer_id, sdp).await,
            PeerCommand::RemoteCandidate { peer_id, candidate } => {
                self.on_candidate(peer_id, candidate).await
            }
            PeerCommand::Close { peer_id } => self.close_peer(&peer_id).await,
            PeerCommand::CloseAll { done } => {
                self.close_all().await;
                let _ = done.send(());
            }
            PeerCommand::State { peer_id, reply } => {
                let _ = reply.send(self.peers.get(&peer_id).map(|entry| entry.state));
            }
        }
    }

    async fn initiate(&mut self, peer_id: PeerId) {
        if peer_id == self.local_id {
            debug!("Refusing to connect to ourselves");
            return;
        }
        if let Some(entry) = self.peers.get(&peer_id) {
            if !entry.state.is_terminal() {
                debug!(
                    "Connection to {} already {:?}, ignoring initiate",
                    peer_id, entry.state
                );
                return;
            }
            info!("Recreating {:?} connection to {}", entry.state, peer_id);
            self.release(&peer_id).await;
        }

        let Some(transport) = self.create_transport(&peer_id, Role::Offerer).await else {
            return;
        };

        let sdp = match transport.create_offer().await {
            Ok(sdp) => sdp,
            Err(e) => {
                self.fail(&peer_id, SessionError::negotiation(&peer_id, format!("{e:#}")))
                    .await;
                return;
            }
        };

        info!("Sending offer to {}", peer_id);
        if let Err(e) = self
            .signaling
            .send_offer(self.local_id.clone(), peer_id.clone(), sdp)
            .await
        {
            self.fail(&peer_id, e).await;
        }
    }

    async fn on_offer(&mut self, peer_id: PeerId, sdp: String) {
        if let Some(entry) = self.peers.get(&peer_id) {
            if entry.offer_pending() {
                if self.local_id.initiates_to(&peer_id) {
                    info!("Offer collision with {}, keeping our own offer", peer_id);
                    return;
                }
                info!("Offer collision with {}, yielding to remote offer", peer_id);
                self.release(&peer_id).await;
            } else if entry.state.is_terminal() {
                self.release(&peer_id).await;
            }
        }

        let transport = match self.peers.get(&peer_id) {
            Some(entry) => entry.transport.clone(),
            None => match self.create_transport(&peer_id, Role::Answerer).await {
                Some(transport) => transport,
                None => return,
            },
        };

        let answer = match transport.accept_offer(sdp).await {
            Ok(answer) => answer,
            Err(e) => {
                self.fail(&peer_id, SessionError::negotiation(&peer_id, format!("{e:#}")))
                    .await;
                return;
            }
        };
        if let Some(entry) = self.peers.get_mut(&peer_id) {
            entry.remote_applied = true;
        }

        info!("Sending answer to {}", peer_id);
        if let Err(e) = self
            .signaling
            .send_answer(self.local_id.clone(), peer_id.clone(), answer)
            .await
        {
            self.fail(&peer_id, e).await;
        }
    }

    async fn on_answer(&mut self, peer_id: PeerId, sdp: String) {
        let Some(entry) = self.peers.get(&peer_id) else {
            warn!("{}", SessionError::UnknownPeer(peer_id));
            return;
        };
        if entry.state.is_terminal() {
            debug!("Ignoring answer for {:?} connection to {}", entry.state, peer_id);
            return;
        }

        let transport = entry.transport.clone();
        match transport.apply_answer(sdp).await {
            Ok(()) => {
                if let Some(entry) = self.peers.get_mut(&peer_id) {
                    entry.remote_applied = true;
                }
                debug!("Applied answer from {}", peer_id);
            }
            Err(e) => {
                self.fail(&peer_id, SessionError::negotiation(&peer_id, format!("{e:#}")))
                    .await
            }
        }
    }

    async fn on_candidate(&mut self, peer_id: PeerId, candidate: IceCandidate) {
        let Some(entry) = self.peers.get(&peer_id) else {
            warn!("{}", SessionError::UnknownPeer(peer_id));
            return;
        };

        let transport = entry.transport.clone();
        if let Err(e) = transport.add_ice_candidate(candidate).await {
            warn!("{}", SessionError::negotiation(&peer_id, format!("{e:#}")));
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        if !self.is_current(event.key()) {
            debug!("Ignoring stale transport event {:?}", event);
            if let TransportEvent::ChannelReady(_, link) = event {
                tokio::spawn(async move {
                    let _ = link.close().await;
                });
            }
            return;
        }

        match event {
            TransportEvent::StateChanged(key, state) => self.on_state(key.peer_id, state).await,

            TransportEvent::ChannelReady(key, link) => {
                info!("Data channel to {} is open", key.peer_id);
                self.data.insert(key.peer_id.clone(), link);
                self.emit(PeerEvent::ChannelStateChanged(
                    key.peer_id,
                    DataChannelState::Open,
                ));
            }

            TransportEvent::ChannelClosed(key) => {
                if self.data.remove(&key.peer_id).is_some() {
                    info!("Data channel to {} closed", key.peer_id);
                    self.emit(PeerEvent::ChannelStateChanged(
                        key.peer_id,
                        DataChannelState::Closed,
                    ));
                }
            }

            TransportEvent::Message(key, data) => {
                self.emit(PeerEvent::Data(key.peer_id, data));
            }

            TransportEvent::CandidateGenerated(key, candidate) => {
                if let Err(e) = self
                    .signaling
                    .send_ice(self.local_id.clone(), key.peer_id.clone(), candidate)
                    .await
                {
                    warn!("Local candidate for {} not delivered: {}", key.peer_id, e);
                }
            }
        }
    }

    async fn on_state(&mut self, peer_id: PeerId, state: PeerConnectionState) {
        let Some(entry) = self.peers.get_mut(&peer_id) else {
            return;
        };
        // A terminal connection is replaced, never revived.
        if entry.state.is_terminal() || entry.state == state {
            return;
        }

        info!("Connection to {}: {:?} -> {:?}", peer_id, entry.state, state);
        entry.state = state;
        let transport = entry.transport.clone();
        self.emit(PeerEvent::StateChanged(peer_id.clone(), state));

        if state.is_terminal() {
            self.drop_channel(&peer_id);
            if let Err(e) = transport.close().await {
                debug!("Closing transport for {} failed: {:#}", peer_id, e);
            }
        }
    }

    async fn create_transport(
        &mut self,
        peer_id: &PeerId,
        role: Role,
    ) -> Option<Arc<dyn PeerTransport>> {
        self.next_generation += 1;
        let generation = self.next_generation;
        let key = ConnectionKey::new(peer_id.clone(), generation);

        let transport: Arc<dyn PeerTransport> =
            match self.factory.create(key, self.transport_tx.clone()).await {
                Ok(transport) => Arc::from(transport),
                Err(e) => {
                    error!("Failed to create transport for {}: {:#}", peer_id, e);
                    self.emit(PeerEvent::StateChanged(
                        peer_id.clone(),
                        PeerConnectionState::Failed,
                    ));
                    return None;
                }
            };

        self.peers.insert(
            peer_id.clone(),
            PeerEntry {
                transport: transport.clone(),
                generation,
                state: PeerConnectionState::Connecting,
                role,
                remote_applied: false,
            },
        );
        self.emit(PeerEvent::StateChanged(
            peer_id.clone(),
            PeerConnectionState::Connecting,
        ));
        Some(transport)
    }

    /// Logs the error and moves the peer to `Failed`; a later initiate or
    /// offer negotiates a fresh connection.
    async fn fail(&mut self, peer_id: &PeerId, err: SessionError) {
        error!("{}", err);
        let Some(entry) = self.peers.get_mut(peer_id) else {
            return;
        };
        if entry.state.is_terminal() {
            return;
        }
        entry.state = PeerConnectionState::Failed;
        let transport = entry.transport.clone();
        self.emit(PeerEvent::StateChanged(
            peer_id.clone(),
            PeerConnectionState::Failed,
        ));

        self.drop_channel(peer_id);
        let _ = transport.close().await;
    }

    /// Removes the peer and closes its transport without reporting `Closed`.
    async fn release(&mut self, peer_id: &PeerId) {
        self.drop_channel(peer_id);
        let Some(entry) = self.peers.remove(peer_id) else {
            return;
        };
        if let Err(e) = entry.transport.close().await {
            debug!("Closing transport for {} failed: {:#}", peer_id, e);
        }
    }

    async fn close_peer(&mut self, peer_id: &PeerId) {
        let Some(entry) = self.peers.get(peer_id) else {
            debug!("No connection to {} to close", peer_id);
            return;
        };
        let was_terminal = entry.state.is_terminal();

        self.release(peer_id).await;
        info!("Closed connection to {}", peer_id);
        if !was_terminal {
            self.emit(PeerEvent::StateChanged(
                peer_id.clone(),
                PeerConnectionState::Closed,
            ));
        }
    }

    async fn close_all(&mut self) {
        let peer_ids: Vec<PeerId> = self.peers.keys().cloned().collect();
        for peer_id in peer_ids {
            self.close_peer(&peer_id).await;
        }
        self.data.clear();
    }

    fn drop_channel(&self, peer_id: &PeerId) {
        if let Some(link) = self.data.remove(peer_id) {
            self.emit(PeerEvent::ChannelStateChanged(
                peer_id.clone(),
                DataChannelState::Closed,
            ));
            tokio::spawn(async move {
                let _ = link.close().await;
            });
        }
    }

    fn is_current(&self, key: &ConnectionKey) -> bool {
        self.peers
            .get(&key.peer_id)
            .is_some_and(|entry| entry.generation == key.generation)
    }

    fn emit(&self, event: PeerEvent) {
        if self.events.send(event).is_err() {
            debug!("Peer event receiver dropped");
        }
    }
}

/// Cloneable front of the [`PeerManager`] actor.
#[derive(Clone)]
pub struct PeerManagerHandle {
    commands: mpsc::Sender<PeerCommand>,
    data: DataContext,
}

impl PeerManagerHandle {
    async fn command(&self, cmd: PeerCommand) -> Result<(), SessionError> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| SessionError::SessionClosed)
    }

    pub async fn initiate(&self, peer_id: PeerId) -> Result<(), SessionError> {
        self.command(PeerCommand::Initiate { peer_id }).await
    }

    pub async fn on_offer(&self, peer_id: PeerId, sdp: String) -> Result<(), SessionError> {
        self.command(PeerCommand::RemoteOffer { peer_id, sdp }).await
    }

    pub async fn on_answer(&self, peer_id: PeerId, sdp: String) -> Result<(), SessionError> {
        self.command(PeerCommand::RemoteAnswer { peer_id, sdp }).await
    }

    pub async fn on_candidate(
        &self,
        peer_id: PeerId,
        candidate: IceCandidate,
    ) -> Result<(), SessionError> {
        self.command(PeerCommand::RemoteCandidate { peer_id, candidate })
            .await
    }

    pub async fn close(&self, peer_id: PeerId) -> Result<(), SessionError> {
        self.command(PeerCommand::Close { peer_id }).await
    }

    /// Resolves once every connection has been released.
    pub async fn close_all(&self) -> Result<(), SessionError> {
        let (done, rx) = oneshot::channel();
        self.command(PeerCommand::CloseAll { done }).await?;
        rx.await.map_err(|_| SessionError::SessionClosed)
    }

    pub async fn state(&self, peer_id: PeerId) -> Result<Option<PeerConnectionState>, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.command(PeerCommand::State { peer_id, reply }).await?;
        rx.await.map_err(|_| SessionError::SessionClosed)
    }

    pub async fn send_data(&self, peer_id: &PeerId, data: Bytes) -> Result<(), SessionError> {
        self.data.send(peer_id, data).await
    }

    pub fn broadcast_data(&self, data: Bytes) -> usize {
        self.data.broadcast(data)
    }

    pub fn data(&self) -> &DataContext {
        &self.data
    }
}
