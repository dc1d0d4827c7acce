use crate::config::SignalingConfig;
use crate::signaling::stomp::StompFrame;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use sangha_core::SessionError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Text transport to the rendezvous server.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Opens the transport and returns the ordered stream of inbound frames.
    /// Calling it again after a disconnect starts a fresh stream.
    async fn connect(&self) -> Result<mpsc::Receiver<String>, SessionError>;

    /// Fails with [`SessionError::NotConnected`] while disconnected; never retried.
    async fn send(&self, destination: &str, payload: String) -> Result<(), SessionError>;

    async fn disconnect(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Disconnected,
    Connecting,
    Connected,
}

struct ChannelInner {
    status: watch::Sender<ChannelStatus>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    tasks: Mutex<Option<SocketTasks>>,
}

struct SocketTasks {
    send: JoinHandle<()>,
    recv: JoinHandle<()>,
}

/// STOMP over WebSocket, subscribed to the room topic.
#[derive(Clone)]
pub struct StompSignalingChannel {
    config: SignalingConfig,
    inner: Arc<ChannelInner>,
}

impl StompSignalingChannel {
    pub fn new(config: SignalingConfig) -> Self {
        let (status, _) = watch::channel(ChannelStatus::Disconnected);
        Self {
            config,
            inner: Arc::new(ChannelInner {
                status,
                outbound: Mutex::new(None),
                tasks: Mutex::new(None),
            }),
        }
    }

    pub fn status(&self) -> ChannelStatus {
        *self.inner.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ChannelStatus> {
        self.inner.status.subscribe()
    }

    fn topic(&self) -> String {
        format!("{}/{}", self.config.topic_prefix, self.config.room_id)
    }

    async fn teardown(&self) {
        self.inner.outbound.lock().await.take();
        if let Some(tasks) = self.inner.tasks.lock().await.take() {
            tasks.recv.abort();
            tasks.send.abort();
        }
        self.inner.status.send_replace(ChannelStatus::Disconnected);
    }
}

#[async_trait]
impl SignalingChannel for StompSignalingChannel {
    async fn connect(&self) -> Result<mpsc::Receiver<String>, SessionError> {
        if self.status() != ChannelStatus::Disconnected {
            warn!("Signaling channel already open, reconnecting");
            self.disconnect().await;
        }

        self.inner.status.send_replace(ChannelStatus::Connecting);
        info!("Connecting to signaling server {}", self.config.url);

        let socket = match tokio_tungstenite::connect_async(self.config.url.as_str()).await {
            Ok((socket, _)) => socket,
            Err(e) => {
                error!("WebSocket connect to {} failed: {}", self.config.url, e);
                self.inner.status.send_replace(ChannelStatus::Disconnected);
                return Err(SessionError::NotConnected);
            }
        };

        let (mut sink, mut stream) = socket.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (in_tx, in_rx) = mpsc::channel::<String>(256);

        let send_task = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let subscription_id = format!(
            "sub-{}-{}",
            self.config.room_id,
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );

        let recv_task = tokio::spawn({
            let inner = self.inner.clone();
            let out_tx = out_tx.clone();
            let topic = self.topic();
            let subscription_id = subscription_id.clone();

            async move {
                while let Some(Ok(msg)) = stream.next().await {
                    let text = match msg {
                        Message::Text(text) => text,
                        Message::Close(_) => break,
                        _ => continue,
                    };
                    if text.trim_matches(['\r', '\n']).is_empty() {
                        continue;
                    }

                    let frame = match StompFrame::parse(&text) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!("Dropping unparsable STOMP frame: {}", e);
                            continue;
                        }
                    };

                    match frame.command.as_str() {
                        "CONNECTED" => {
                            let subscribe = StompFrame::subscribe(&topic, &subscription_id);
                            let _ = out_tx.send(Message::Text(subscribe.encode()));
                            inner.status.send_replace(ChannelStatus::Connected);
                            info!("STOMP session established, subscribed to {}", topic);
                        }
                        "MESSAGE" => {
                            if frame.header("subscription") != Some(subscription_id.as_str()) {
                                debug!(
                                    "Ignoring message for subscription {:?}",
                                    frame.header("subscription")
                                );
                                continue;
                            }
                            if in_tx.send(frame.body).await.is_err() {
                                break;
                            }
                        }
                        "ERROR" => {
                            error!(
                                "STOMP error frame: {:?} {}",
                                frame.header("message"),
                                frame.body
                            );
                            break;
                        }
                        other => debug!("Unhandled STOMP frame {}", other),
                    }
                }

                inner.outbound.lock().await.take();
                inner.status.send_replace(ChannelStatus::Disconnected);
                info!("Signaling stream finished");
            }
        });

        *self.inner.outbound.lock().await = Some(out_tx.clone());
        *self.inner.tasks.lock().await = Some(SocketTasks {
            send: send_task,
            recv: recv_task,
        });

        let connect = StompFrame::connect(&self.config.host, self.config.token.as_deref());
        if out_tx.send(Message::Text(connect.encode())).is_err() {
            self.teardown().await;
            return Err(SessionError::NotConnected);
        }

        let mut status = self.inner.status.subscribe();
        let established = tokio::time::timeout(
            self.config.connect_timeout(),
            status.wait_for(|s| *s != ChannelStatus::Connecting),
        )
        .await
        .map(|r| r.map(|s| *s));

        match established {
            Ok(Ok(ChannelStatus::Connected)) => Ok(in_rx),
            Ok(_) => {
                warn!("Signaling server closed the session during the handshake");
                self.teardown().await;
                Err(SessionError::NotConnected)
            }
            Err(_) => {
                warn!(
                    "STOMP handshake timed out after {:?}",
                    self.config.connect_timeout()
                );
                self.teardown().await;
                Err(SessionError::NotConnected)
            }
        }
    }

    async fn send(&self, destination: &str, payload: String) -> Result<(), SessionError> {
        if self.status() != ChannelStatus::Connected {
            warn!("Cannot send to {}: signaling not connected", destination);
            return Err(SessionError::NotConnected);
        }

        let frame = StompFrame::send(destination, payload);
        let outbound = self.inner.outbound.lock().await;
        let Some(tx) = outbound.as_ref() else {
            return Err(SessionError::NotConnected);
        };
        tx.send(Message::Text(frame.encode()))
            .map_err(|_| SessionError::NotConnected)
    }

    async fn disconnect(&self) {
        if self.status() == ChannelStatus::Disconnected {
            return;
        }
        info!("Disconnecting from signaling server");

        if let Some(tx) = self.inner.outbound.lock().await.take() {
            if self.status() == ChannelStatus::Connected {
                let _ = tx.send(Message::Text(StompFrame::disconnect().encode()));
            }
            let _ = tx.send(Message::Close(None));
        }

        // Dropping the reader releases the last sender, so the writer flushes
        // the queued DISCONNECT and exits on its own.
        if let Some(mut tasks) = self.inner.tasks.lock().await.take() {
            tasks.recv.abort();
            if tokio::time::timeout(Duration::from_secs(1), &mut tasks.send)
                .await
                .is_err()
            {
                tasks.send.abort();
            }
        }
        self.inner.status.send_replace(ChannelStatus::Disconnected);
    }
}
