//! Chunk-storage collaborator boundary.
//!
//! Every audio frame received from the generative backend is handed to a
//! [`ChunkStorage`] so the session recording can be assembled away from the
//! playback-critical path. The engine never awaits the result: handoff is a
//! bounded-channel send, and the worker task does the accumulation.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[async_trait]
pub trait ChunkStorage: Send + Sync {
    /// Hand one raw audio frame to the collaborator. Must never block the
    /// caller; implementations drop the frame rather than apply backpressure.
    fn add_audio_data(&self, frame: Vec<u8>);

    /// Take the assembled session recording, leaving it empty. Called at
    /// session end so recordings never accumulate across sessions.
    fn take_recording(&self) -> Vec<u8>;

    /// Drain outstanding frames and stop the worker.
    async fn shutdown(&self);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub chunks_stored: u64,
    pub bytes_stored: u64,
    pub chunks_dropped: u64,
}

enum StorageCommand {
    Frame(Vec<u8>),
    Shutdown,
}

/// Offloads frame accumulation to a spawned worker over a bounded channel.
pub struct ChannelChunkStorage {
    tx: mpsc::Sender<StorageCommand>,
    stats: Arc<Mutex<StorageStats>>,
    recording: Arc<Mutex<Vec<u8>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelChunkStorage {
    pub fn new(queue_size: usize, max_recording_bytes: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let stats = Arc::new(Mutex::new(StorageStats::default()));
        let recording = Arc::new(Mutex::new(Vec::new()));
        let worker = tokio::spawn(Self::run_worker(
            rx,
            stats.clone(),
            recording.clone(),
            max_recording_bytes,
        ));
        Self {
            tx,
            stats,
            recording,
            worker: Mutex::new(Some(worker)),
        }
    }

    async fn run_worker(
        mut rx: mpsc::Receiver<StorageCommand>,
        stats: Arc<Mutex<StorageStats>>,
        recording: Arc<Mutex<Vec<u8>>>,
        max_recording_bytes: usize,
    ) {
        while let Some(command) = rx.recv().await {
            match command {
                StorageCommand::Frame(frame) => {
                    let mut recording = recording.lock().expect("recording lock poisoned");
                    if recording.len() + frame.len() > max_recording_bytes {
                        let mut stats = stats.lock().expect("stats lock poisoned");
                        stats.chunks_dropped += 1;
                        warn!(
                            "Session recording cap reached ({} bytes), dropped frame",
                            max_recording_bytes
                        );
                        continue;
                    }
                    recording.extend_from_slice(&frame);
                    let mut stats = stats.lock().expect("stats lock poisoned");
                    stats.chunks_stored += 1;
                    stats.bytes_stored += frame.len() as u64;
                }
                StorageCommand::Shutdown => break,
            }
        }
        debug!("Chunk storage worker stopped");
    }

    pub fn stats(&self) -> StorageStats {
        self.stats.lock().expect("stats lock poisoned").clone()
    }
}

#[async_trait]
impl ChunkStorage for ChannelChunkStorage {
    fn add_audio_data(&self, frame: Vec<u8>) {
        if self.tx.try_send(StorageCommand::Frame(frame)).is_err() {
            let mut stats = self.stats.lock().expect("stats lock poisoned");
            stats.chunks_dropped += 1;
            warn!(
                "Chunk storage queue full, dropped frame ({} dropped so far)",
                stats.chunks_dropped
            );
        }
    }

    fn take_recording(&self) -> Vec<u8> {
        std::mem::take(&mut *self.recording.lock().expect("recording lock poisoned"))
    }

    async fn shutdown(&self) {
        let _ = self.tx.send(StorageCommand::Shutdown).await;
        let worker = self.worker.lock().expect("worker lock poisoned").take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

/// Discards every frame. Used when recording is disabled and in tests.
pub struct NoOpChunkStorage;

#[async_trait]
impl ChunkStorage for NoOpChunkStorage {
    fn add_audio_data(&self, _frame: Vec<u8>) {}

    fn take_recording(&self) -> Vec<u8> {
        Vec::new()
    }

    async fn shutdown(&self) {}
}
