//! Capture → chunk → upload pipeline
//!
//! ```text
//! capture thread ──crossbeam──▶ chunker thread ──mpsc──▶ async uploader ──HTTP──▶ relay
//! ```
//!
//! Both queues are bounded and lossy: a slow relay costs chunks, never
//! capture latency.

use crossbeam_channel::Receiver;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;

use crate::agent::capture::{CaptureBuffer, CaptureSource};
use crate::agent::machine_id::machine_id;
use crate::agent::uploader::Uploader;
use crate::audio::{convert, needs_conversion, ChunkAccumulator, PcmChunk};
use crate::config::AgentConfig;
use crate::constants::CAPTURE_QUEUE_CAPACITY;
use crate::error::CaptureError;

/// Accumulates capture buffers into chunks and normalizes their format
pub struct ChunkPipeline {
    accumulator: ChunkAccumulator,
    config: AgentConfig,
    conversion_failed: bool,
}

impl ChunkPipeline {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            accumulator: ChunkAccumulator::with_chunk_ms(config.chunk_ms),
            config: config.clone(),
            conversion_failed: false,
        }
    }

    /// Feed one capture buffer; returns the chunks ready for upload
    pub fn process(&mut self, buffer: CaptureBuffer) -> Vec<PcmChunk> {
        self.accumulator
            .push(&buffer.data, buffer.format)
            .into_iter()
            .map(|chunk| self.normalize(chunk))
            .collect()
    }

    /// Emit the pending tail, if any
    pub fn finish(&mut self) -> Option<PcmChunk> {
        self.accumulator.flush().map(|chunk| self.normalize(chunk))
    }

    /// Convert to the configured upload format. Chunks that cannot be
    /// converted are sent as captured.
    fn normalize(&mut self, chunk: PcmChunk) -> PcmChunk {
        let target = self.config.upload_format(chunk.format);
        if !needs_conversion(chunk.format, target) {
            return chunk;
        }

        match convert(&chunk.data, chunk.format, target) {
            Ok(data) => PcmChunk::new(target, data.into()),
            Err(e) => {
                if !self.conversion_failed {
                    tracing::warn!("Sending audio unconverted: {}", e);
                    self.conversion_failed = true;
                }
                chunk
            }
        }
    }
}

/// Agent-side counters
#[derive(Debug, Default)]
pub struct AgentStats {
    pub chunks_produced: AtomicU64,
    pub chunks_dropped: AtomicU64,
    pub chunks_uploaded: AtomicU64,
    pub upload_failures: AtomicU64,
}

/// Capture agent streaming one source to the relay
pub struct CaptureAgent {
    config: AgentConfig,
    machine_id: String,
    stats: Arc<AgentStats>,
}

impl CaptureAgent {
    pub fn new(config: AgentConfig) -> Self {
        let machine_id = config
            .machine_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| machine_id().to_string());

        Self {
            config,
            machine_id,
            stats: Arc::new(AgentStats::default()),
        }
    }

    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    pub fn stats(&self) -> Arc<AgentStats> {
        self.stats.clone()
    }

    /// Stream `source` to the relay until `shutdown` resolves
    pub async fn run<S, F>(&self, mut source: S, shutdown: F) -> crate::Result<()>
    where
        S: CaptureSource,
        F: Future<Output = ()>,
    {
        let uploader = Uploader::new(&self.config, self.machine_id.clone())?;
        tracing::info!("Machine ID: {}", self.machine_id);

        match uploader.check_health().await {
            Ok(health) => tracing::info!(
                "Relay is {} ({} sources, {} viewers)",
                health.status,
                health.audio_clients,
                health.browser_clients
            ),
            Err(e) => tracing::warn!("Relay health check failed, streaming anyway: {}", e),
        }

        let (capture_tx, capture_rx) = crossbeam_channel::bounded(CAPTURE_QUEUE_CAPACITY);
        let (upload_tx, mut upload_rx) = mpsc::channel(self.config.upload_queue.max(1));

        let chunker = spawn_chunker(ChunkPipeline::new(&self.config), capture_rx, upload_tx, self.stats.clone())?;
        source.start(capture_tx)?;
        tracing::info!("Streaming {} to {}", source.format(), self.config.server_url);

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                chunk = upload_rx.recv() => {
                    let Some(chunk) = chunk else { break };
                    match uploader.upload(&chunk).await {
                        Ok(()) => {
                            self.stats.chunks_uploaded.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            let failures = self.stats.upload_failures.fetch_add(1, Ordering::Relaxed) + 1;
                            if failures == 1 || failures % 100 == 0 {
                                tracing::warn!("Upload failed ({} total): {}", failures, e);
                            }
                        }
                    }
                }
            }
        }

        source.stop();
        drop(upload_rx);
        if !matches!(tokio::task::spawn_blocking(move || chunker.join()).await, Ok(Ok(()))) {
            tracing::warn!("Chunker thread did not shut down cleanly");
        }

        tracing::info!(
            "Agent stopped: {} chunks produced, {} uploaded, {} dropped, {} failed, {} capture buffers dropped",
            self.stats.chunks_produced.load(Ordering::Relaxed),
            self.stats.chunks_uploaded.load(Ordering::Relaxed),
            self.stats.chunks_dropped.load(Ordering::Relaxed),
            self.stats.upload_failures.load(Ordering::Relaxed),
            source.dropped()
        );
        Ok(())
    }
}

/// Run the chunking stage on its own thread
fn spawn_chunker(
    mut pipeline: ChunkPipeline,
    capture_rx: Receiver<CaptureBuffer>,
    upload_tx: mpsc::Sender<PcmChunk>,
    stats: Arc<AgentStats>,
) -> Result<JoinHandle<()>, CaptureError> {
    thread::Builder::new()
        .name("chunker".to_string())
        .spawn(move || {
            let forward = |chunk: PcmChunk| -> bool {
                stats.chunks_produced.fetch_add(1, Ordering::Relaxed);
                match upload_tx.try_send(chunk) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        stats.chunks_dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::trace!("Upload queue full, chunk dropped");
                        true
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                }
            };

            for buffer in capture_rx.iter() {
                for chunk in pipeline.process(buffer) {
                    if !forward(chunk) {
                        return;
                    }
                }
            }
            if let Some(chunk) = pipeline.finish() {
                forward(chunk);
            }
        })
        .map_err(|e| CaptureError::Stream(e.to_string()))
}
