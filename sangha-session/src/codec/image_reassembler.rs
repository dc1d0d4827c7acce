use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use bytes::{Bytes, BytesMut};
use sangha_core::{ImageChunkMessage, PeerId, SessionError};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// What makes two chunks part of the same image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageKey {
    pub origin: PeerId,
    pub image_id: Option<u64>,
    pub total_chunks: u32,
}

impl ImageKey {
    pub fn of(from: &PeerId, chunk: &ImageChunkMessage) -> Self {
        Self {
            origin: from.clone(),
            image_id: chunk.image_id,
            total_chunks: chunk.total_chunks,
        }
    }
}

/// Chunks collected so far for the image in flight.
#[derive(Debug)]
pub struct PeerImageBuffer {
    pub total_chunks_expected: u32,
    pub received_chunks: HashMap<u32, Bytes>,
    pub last_received: Instant,
    /// Sender of the chunk that opened this buffer.
    pub origin: PeerId,
    pub image_id: Option<u64>,
}

impl PeerImageBuffer {
    pub fn new(key: ImageKey) -> Self {
        Self {
            total_chunks_expected: key.total_chunks,
            received_chunks: HashMap::new(),
            last_received: Instant::now(),
            origin: key.origin,
            image_id: key.image_id,
        }
    }

    pub fn key(&self) -> ImageKey {
        ImageKey {
            origin: self.origin.clone(),
            image_id: self.image_id,
            total_chunks: self.total_chunks_expected,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.received_chunks.len() == self.total_chunks_expected as usize
    }

    /// Concatenates chunks `0..total` in order. A missing index aborts the image.
    pub fn assemble(&self) -> Result<Bytes, SessionError> {
        let size = self.received_chunks.values().map(Bytes::len).sum();
        let mut image = BytesMut::with_capacity(size);

        for index in 0..self.total_chunks_expected {
            let Some(chunk) = self.received_chunks.get(&index) else {
                return Err(SessionError::ReassemblyAborted {
                    missing: index,
                    total: self.total_chunks_expected,
                });
            };
            image.extend_from_slice(chunk);
        }
        Ok(image.freeze())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedImage {
    pub from: PeerId,
    pub data: Bytes,
}

/// Receive half of the image codec.
///
/// Holds a single buffer for the whole session: a chunk of any other image,
/// from any peer, discards the partial one. Chunks carrying an image id may
/// arrive in any order. Without an id, index 0 always opens a new image.
#[derive(Debug, Default)]
pub struct ImageReassembler {
    buffer: Option<PeerImageBuffer>,
    /// Last image emitted; its late chunks are dropped instead of opening a buffer.
    finished: Option<ImageKey>,
}

impl ImageReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk. Returns the finished image once the last missing
    /// chunk arrives. An `Err` means the chunk (or the image) was dropped;
    /// the reassembler stays usable.
    pub fn process_chunk(
        &mut self,
        from: &PeerId,
        chunk: &ImageChunkMessage,
    ) -> Result<Option<CompletedImage>, SessionError> {
        chunk.validate()?;
        let data = BASE64_STANDARD
            .decode(&chunk.data_base64)
            .map_err(|e| SessionError::DecodeError(format!("chunk {}: {}", chunk.chunk_index, e)))?;

        let key = ImageKey::of(from, chunk);
        let untagged = key.image_id.is_none();

        if self.finished.as_ref() == Some(&key) && !(untagged && chunk.chunk_index == 0) {
            debug!(
                "Dropping chunk {} of an image from {} that already completed",
                chunk.chunk_index, from
            );
            return Ok(None);
        }

        let starts_new = self
            .buffer
            .as_ref()
            .is_none_or(|buffer| buffer.key() != key || (untagged && chunk.chunk_index == 0));
        if starts_new {
            if let Some(old) = self.buffer.as_ref().filter(|b| !b.received_chunks.is_empty()) {
                debug!(
                    "Discarding partial image from {} ({}/{} chunks)",
                    old.origin,
                    old.received_chunks.len(),
                    old.total_chunks_expected
                );
            }
            if untagged {
                self.finished = None;
            }
            self.buffer = Some(PeerImageBuffer::new(key));
        }

        let Some(buffer) = self.buffer.as_mut() else {
            return Ok(None);
        };
        buffer
            .received_chunks
            .insert(chunk.chunk_index, Bytes::from(data));
        buffer.last_received = Instant::now();

        if !buffer.is_complete() {
            return Ok(None);
        }

        let Some(buffer) = self.buffer.take() else {
            return Ok(None);
        };
        self.finished = Some(buffer.key());
        let data = buffer.assemble()?;
        Ok(Some(CompletedImage {
            from: buffer.origin,
            data,
        }))
    }

    /// Drops the partial image if its last chunk is older than `timeout`.
    pub fn discard_stale(&mut self, now: Instant, timeout: Duration) -> bool {
        let stale = self
            .buffer
            .as_ref()
            .is_some_and(|buffer| now.duration_since(buffer.last_received) >= timeout);
        if stale {
            self.buffer = None;
        }
        stale
    }

    pub fn clear(&mut self) {
        self.buffer = None;
        self.finished = None;
    }

    /// `(received, expected)` for the image in flight.
    pub fn progress(&self) -> Option<(usize, u32)> {
        self.buffer
            .as_ref()
            .map(|buffer| (buffer.received_chunks.len(), buffer.total_chunks_expected))
    }
}

#[derive(Debug)]
pub enum ReassemblyInput {
    Chunk(PeerId, ImageChunkMessage),
    Clear,
}

/// Serial queue in front of an [`ImageReassembler`].
///
/// Chunks are processed one at a time on a dedicated task, so inbound
/// images never hold up signaling.
#[derive(Clone)]
pub struct ImageReceiver {
    input: mpsc::UnboundedSender<ReassemblyInput>,
}

impl ImageReceiver {
    pub fn spawn(
        stale_timeout: Option<Duration>,
    ) -> (Self, mpsc::UnboundedReceiver<CompletedImage>, JoinHandle<()>) {
        let (input, input_rx) = mpsc::unbounded_channel();
        let (completed_tx, completed_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_reassembly(input_rx, completed_tx, stale_timeout));
        (Self { input }, completed_rx, task)
    }

    pub fn push(&self, from: PeerId, chunk: ImageChunkMessage) {
        if self.input.send(ReassemblyInput::Chunk(from, chunk)).is_err() {
            debug!("Reassembly worker stopped, dropping chunk");
        }
    }

    pub fn clear(&self) {
        let _ = self.input.send(ReassemblyInput::Clear);
    }
}

async fn run_reassembly(
    mut input: mpsc::UnboundedReceiver<ReassemblyInput>,
    completed: mpsc::UnboundedSender<CompletedImage>,
    stale_timeout: Option<Duration>,
) {
    let mut reassembler = ImageReassembler::new();
    let mut sweep = stale_timeout.map(|timeout| {
        let mut interval = tokio::time::interval((timeout / 2).max(Duration::from_millis(10)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval
    });

    loop {
        tokio::select! {
            msg = input.recv() => {
                match msg {
                    Some(ReassemblyInput::Chunk(from, chunk)) => {
                        match reassembler.process_chunk(&from, &chunk) {
                            Ok(Some(image)) => {
                                info!("Image from {} complete ({} bytes)", image.from, image.data.len());
                                if completed.send(image).is_err() {
                                    break;
                                }
                            }
                            Ok(None) => {}
                            Err(e @ SessionError::ReassemblyAborted { .. }) => error!("{}", e),
                            Err(e) => warn!("Dropping chunk from {}: {}", from, e),
                        }
                    }
                    Some(ReassemblyInput::Clear) => reassembler.clear(),
                    None => break,
                }
            }

            now = tick(&mut sweep) => {
                if let Some(timeout) = stale_timeout
                    && reassembler.discard_stale(now, timeout)
                {
                    warn!("Discarded incomplete image after {:?} without chunks", timeout);
                }
            }
        }
    }
    debug!("Reassembly worker finished");
}

async fn tick(sweep: &mut Option<tokio::time::Interval>) -> Instant {
    match sweep {
        Some(interval) => interval.tick().await,
        None => std::future::pending().await,
    }
}
