use crate::config::ImageConfig;
use crate::peer::DataContext;
use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use bytes::Bytes;
use futures::future::join_all;
use sangha_core::{ImageChunkMessage, PeerId, PeerMessage, SessionError};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Optional re-encoding step applied before an image is split.
pub trait ImageRecompressor: Send + Sync {
    fn recompress(&self, image: &Bytes, quality: u8) -> anyhow::Result<Bytes>;
}

/// Sends images exactly as given.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl ImageRecompressor for Passthrough {
    fn recompress(&self, image: &Bytes, _quality: u8) -> anyhow::Result<Bytes> {
        Ok(image.clone())
    }
}

/// Splits `image` into `ceil(len / chunk_size)` base64 chunks, in index order,
/// all tagged with `image_id`. An empty image yields no chunks.
pub fn split_image(
    image: &[u8],
    chunk_size: usize,
    image_id: Option<u64>,
) -> Vec<ImageChunkMessage> {
    let chunk_size = chunk_size.max(1);
    let total_chunks = image.len().div_ceil(chunk_size) as u32;

    image
        .chunks(chunk_size)
        .enumerate()
        .map(|(index, slice)| ImageChunkMessage {
            chunk_index: index as u32,
            total_chunks,
            data_base64: BASE64_STANDARD.encode(slice),
            image_id,
        })
        .collect()
}

/// Outbound half of the image codec.
#[derive(Clone)]
pub struct ImageSender {
    data: DataContext,
    recompressor: Arc<dyn ImageRecompressor>,
    chunk_size: usize,
    quality: u8,
    interval: Duration,
    next_image_id: Arc<AtomicU64>,
}

impl ImageSender {
    pub fn new(data: DataContext, config: &ImageConfig) -> Self {
        Self {
            data,
            recompressor: Arc::new(Passthrough),
            chunk_size: config.chunk_size,
            quality: config.quality,
            interval: config.chunk_interval(),
            // Random start so ids stay distinct across restarts of the same peer.
            next_image_id: Arc::new(AtomicU64::new(uuid::Uuid::new_v4().as_u64_pair().0)),
        }
    }

    pub fn with_recompressor(mut self, recompressor: Arc<dyn ImageRecompressor>) -> Self {
        self.recompressor = recompressor;
        self
    }

    /// Encodes the image into wire frames, falling back to the original bytes
    /// when recompression fails.
    pub fn encode(&self, image: Bytes) -> Result<Vec<Bytes>, SessionError> {
        let image = match self.recompressor.recompress(&image, self.quality) {
            Ok(recompressed) => recompressed,
            Err(e) => {
                warn!("Recompression failed, sending original image: {:#}", e);
                image
            }
        };

        let image_id = self.next_image_id.fetch_add(1, Ordering::Relaxed);
        split_image(&image, self.chunk_size, Some(image_id))
            .into_iter()
            .map(|chunk| PeerMessage::ImageChunk(chunk).encode())
            .collect()
    }

    /// Sends an image to one peer, or to every open channel when `target` is
    /// `None`. Returns the number of chunks per recipient.
    ///
    /// Chunks to one peer always leave in index order; recipients are served
    /// concurrently so a stalled channel does not hold back the others.
    pub async fn send(&self, target: Option<&PeerId>, image: Bytes) -> Result<usize, SessionError> {
        let frames = self.encode(image)?;
        if frames.is_empty() {
            debug!("Empty image, nothing to send");
            return Ok(0);
        }

        match target {
            Some(peer_id) => {
                self.send_frames(peer_id, &frames).await?;
                info!("Sent image ({} chunks) to {}", frames.len(), peer_id);
            }
            None => {
                let peers = self.data.open_peers();
                let results = join_all(
                    peers
                        .iter()
                        .map(|peer_id| self.send_frames(peer_id, &frames)),
                )
                .await;
                let delivered = results.iter().filter(|r| r.is_ok()).count();
                info!(
                    "Broadcast image ({} chunks) to {}/{} peers",
                    frames.len(),
                    delivered,
                    peers.len()
                );
            }
        }
        Ok(frames.len())
    }

    async fn send_frames(&self, peer_id: &PeerId, frames: &[Bytes]) -> Result<(), SessionError> {
        for (index, frame) in frames.iter().enumerate() {
            if index > 0 && !self.interval.is_zero() {
                tokio::time::sleep(self.interval).await;
            }
            self.data.send(peer_id, frame.clone()).await?;
        }
        Ok(())
    }
}

struct OutgoingImage {
    target: Option<PeerId>,
    image: Bytes,
    reply: oneshot::Sender<Result<usize, SessionError>>,
}

/// Serial queue in front of an [`ImageSender`].
///
/// Images leave one at a time in submission order, so the chunks of two
/// images never interleave on a channel.
#[derive(Clone)]
pub struct ImageOutbox {
    input: mpsc::UnboundedSender<OutgoingImage>,
}

impl ImageOutbox {
    pub fn spawn(sender: ImageSender) -> (Self, JoinHandle<()>) {
        let (input, input_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_outbox(sender, input_rx));
        (Self { input }, task)
    }

    /// Queues an image; `reply` receives the result of [`ImageSender::send`].
    pub fn submit(
        &self,
        target: Option<PeerId>,
        image: Bytes,
        reply: oneshot::Sender<Result<usize, SessionError>>,
    ) {
        let job = OutgoingImage {
            target,
            image,
            reply,
        };
        if let Err(mpsc::error::SendError(job)) = self.input.send(job) {
            debug!("Image outbox stopped, rejecting image");
            let _ = job.reply.send(Err(SessionError::SessionClosed));
        }
    }
}

async fn run_outbox(sender: ImageSender, mut input: mpsc::UnboundedReceiver<OutgoingImage>) {
    while let Some(job) = input.recv().await {
        let result = sender.send(job.target.as_ref(), job.image).await;
        let _ = job.reply.send(result);
    }
    debug!("Image outbox finished");
}
