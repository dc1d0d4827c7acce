use crate::transport::{
    ConnectionKey, DataLink, PeerTransport, TransportConfig, TransportEvent, TransportFactory,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use sangha_core::{DataChannelState, IceCandidate, PeerConnectionState};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

const DATA_CHANNEL_LABEL: &str = "sangha";

/// Creates `webrtc` peer connections from one shared engine.
pub struct RtcTransportFactory {
    api: Arc<API>,
    config: TransportConfig,
}

impl RtcTransportFactory {
    pub fn new(config: TransportConfig) -> Result<Self> {
        let mut media = MediaEngine::default();
        media.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media)?;

        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self {
            api: Arc::new(api),
            config,
        })
    }
}

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    async fn create(
        &self,
        key: ConnectionKey,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Box<dyn PeerTransport>> {
        let wrapper = ConnectionWrapper::new(&self.api, &self.config, key, events).await?;
        Ok(Box::new(wrapper))
    }
}

pub struct ConnectionWrapper {
    key: ConnectionKey,
    peer_connection: Arc<RTCPeerConnection>,
    events: mpsc::Sender<TransportEvent>,
    /// Locally created channel, kept alive for the lifetime of the connection.
    data_channel: Mutex<Option<Arc<RTCDataChannel>>>,
    /// Remote candidates that arrived before the remote description.
    pending_candidates: Mutex<Vec<RTCIceCandidateInit>>,
}

impl ConnectionWrapper {
    pub async fn new(
        api: &API,
        config: &TransportConfig,
        key: ConnectionKey,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Self> {
        let rtc_config = RTCConfiguration {
            ice_servers: config.rtc_ice_servers(),
            ..Default::default()
        };
        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await?);

        let state_tx = events.clone();
        let state_key = key.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                let tx = state_tx.clone();
                let key = state_key.clone();

                Box::pin(async move {
                    info!("Peer connection {} changed state to {}", key, s);
                    let Some(state) = map_connection_state(s) else {
                        return;
                    };
                    let _ = tx.send(TransportEvent::StateChanged(key, state)).await;
                })
            },
        ));

        let ice_tx = events.clone();
        let ice_key = key.clone();
        peer_connection.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
            let tx = ice_tx.clone();
            let key = ice_key.clone();

            Box::pin(async move {
                let Some(candidate) = c else { return };
                let init = match candidate.to_json() {
                    Ok(init) => init,
                    Err(e) => {
                        warn!("Failed to serialize local candidate for {}: {}", key, e);
                        return;
                    }
                };
                let candidate = IceCandidate {
                    sdp_mid: init.sdp_mid,
                    sdp_m_line_index: init.sdp_mline_index.unwrap_or_default(),
                    sdp_candidate: init.candidate,
                };
                let _ = tx
                    .send(TransportEvent::CandidateGenerated(key, candidate))
                    .await;
            })
        }));

        let dc_tx = events.clone();
        let dc_key = key.clone();
        peer_connection.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let tx = dc_tx.clone();
            let key = dc_key.clone();

            Box::pin(async move {
                debug!("Inbound data channel '{}' for {}", dc.label(), key);
                wire_data_channel(&key, &dc, &tx);
            })
        }));

        Ok(Self {
            key,
            peer_connection,
            events,
            data_channel: Mutex::new(None),
            pending_candidates: Mutex::new(Vec::new()),
        })
    }

    async fn set_remote(&self, desc: RTCSessionDescription) -> Result<()> {
        self.peer_connection.set_remote_description(desc).await?;

        let pending = std::mem::take(&mut *self.pending_candidates.lock().await);
        if !pending.is_empty() {
            debug!(
                "Applying {} queued candidates for {}",
                pending.len(),
                self.key
            );
        }
        for candidate in pending {
            if let Err(e) = self.peer_connection.add_ice_candidate(candidate).await {
                warn!("Queued candidate rejected for {}: {}", self.key, e);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PeerTransport for ConnectionWrapper {
    async fn create_offer(&self) -> Result<String> {
        let options = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let dc = self
            .peer_connection
            .create_data_channel(DATA_CHANNEL_LABEL, Some(options))
            .await
            .context("Failed to create data channel")?;
        wire_data_channel(&self.key, &dc, &self.events);
        *self.data_channel.lock().await = Some(dc);

        let offer = self.peer_connection.create_offer(None).await?;
        self.peer_connection
            .set_local_description(offer.clone())
            .await?;
        Ok(offer.sdp)
    }

    async fn accept_offer(&self, sdp: String) -> Result<String> {
        let desc = RTCSessionDescription::offer(sdp).context("Invalid remote offer")?;
        self.set_remote(desc).await?;

        let answer = self.peer_connection.create_answer(None).await?;
        self.peer_connection
            .set_local_description(answer.clone())
            .await?;
        Ok(answer.sdp)
    }

    async fn apply_answer(&self, sdp: String) -> Result<()> {
        let desc = RTCSessionDescription::answer(sdp).context("Invalid remote answer")?;
        self.set_remote(desc).await
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.sdp_candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: Some(candidate.sdp_m_line_index),
            username_fragment: None,
        };

        if self.peer_connection.remote_description().await.is_none() {
            self.pending_candidates.lock().await.push(init);
            return Ok(());
        }
        self.peer_connection.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(dc) = self.data_channel.lock().await.take() {
            let _ = dc.close().await;
        }
        self.peer_connection.close().await?;
        Ok(())
    }
}

/// Forwards open/close/message callbacks of a channel, whichever side created it.
fn wire_data_channel(
    key: &ConnectionKey,
    dc: &Arc<RTCDataChannel>,
    events: &mpsc::Sender<TransportEvent>,
) {
    let tx_open = events.clone();
    let key_open = key.clone();
    let dc_open = dc.clone();
    dc.on_open(Box::new(move || {
        let tx = tx_open.clone();
        let key = key_open.clone();
        let channel = dc_open.clone();
        Box::pin(async move {
            info!("Data channel open for {}", key);
            let link: Arc<dyn DataLink> = Arc::new(RtcDataLink::new(channel));
            let _ = tx.send(TransportEvent::ChannelReady(key, link)).await;
        })
    }));

    let tx_close = events.clone();
    let key_close = key.clone();
    dc.on_close(Box::new(move || {
        let tx = tx_close.clone();
        let key = key_close.clone();
        Box::pin(async move {
            debug!("Data channel closed for {}", key);
            let _ = tx.send(TransportEvent::ChannelClosed(key)).await;
        })
    }));

    let tx_msg = events.clone();
    let key_msg = key.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let tx = tx_msg.clone();
        let key = key_msg.clone();
        Box::pin(async move {
            let _ = tx.send(TransportEvent::Message(key, msg.data)).await;
        })
    }));
}

/// [`DataLink`] over a `webrtc` data channel.
pub struct RtcDataLink {
    channel: Arc<RTCDataChannel>,
}

impl RtcDataLink {
    pub fn new(channel: Arc<RTCDataChannel>) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl DataLink for RtcDataLink {
    fn state(&self) -> DataChannelState {
        map_channel_state(self.channel.ready_state())
    }

    async fn send(&self, data: &Bytes) -> Result<()> {
        self.channel.send(data).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.channel.close().await?;
        Ok(())
    }
}

fn map_connection_state(state: RTCPeerConnectionState) -> Option<PeerConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(PeerConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(PeerConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(PeerConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(PeerConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(PeerConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(PeerConnectionState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

fn map_channel_state(state: RTCDataChannelState) -> DataChannelState {
    match state {
        RTCDataChannelState::Open => DataChannelState::Open,
        RTCDataChannelState::Closing => DataChannelState::Closing,
        RTCDataChannelState::Closed => DataChannelState::Closed,
        RTCDataChannelState::Connecting | RTCDataChannelState::Unspecified => {
            DataChannelState::Connecting
        }
    }
}
