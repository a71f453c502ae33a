//! Chunk accumulator
//!
//! Capture devices hand over PCM at their own cadence, often a few
//! milliseconds at a time and with irregular sizes. The accumulator batches
//! those buffers into fixed ~20ms chunks so that one chunk maps to one network
//! send. Batching is non-overlapping: every input byte ends up in exactly one
//! chunk, in order.

use bytes::{Bytes, BytesMut};
use std::time::Duration;

use crate::constants::DEFAULT_CHUNK_MS;
use crate::protocol::AudioFormat;

/// One network-sized unit of PCM audio
#[derive(Debug, Clone, PartialEq)]
pub struct PcmChunk {
    pub format: AudioFormat,
    pub data: Bytes,
}

impl PcmChunk {
    pub fn new(format: AudioFormat, data: Bytes) -> Self {
        Self { format, data }
    }

    /// Number of whole frames in the chunk
    pub fn frames(&self) -> usize {
        match self.format.block_align() {
            0 => 0,
            align => self.data.len() / align,
        }
    }

    /// Playback duration of the chunk
    pub fn duration(&self) -> Duration {
        self.format.duration_of(self.data.len())
    }
}

/// Single-writer buffer turning raw capture buffers into fixed-size chunks
pub struct ChunkAccumulator {
    /// Bytes received but not yet emitted
    accumulated: BytesMut,

    /// Format of the bytes in `accumulated`
    format: Option<AudioFormat>,

    /// Chunk duration in milliseconds
    chunk_ms: u32,

    /// Chunks emitted so far, irregular flushes included
    chunks_emitted: u64,
}

impl ChunkAccumulator {
    /// Accumulator emitting 20ms chunks
    pub fn new() -> Self {
        Self::with_chunk_ms(DEFAULT_CHUNK_MS)
    }

    pub fn with_chunk_ms(chunk_ms: u32) -> Self {
        Self {
            accumulated: BytesMut::with_capacity(4096),
            format: None,
            chunk_ms: chunk_ms.max(1),
            chunks_emitted: 0,
        }
    }

    /// Chunk size for the current format, if any data has been seen
    pub fn target_bytes(&self) -> Option<usize> {
        self.format.map(|format| format.chunk_bytes(self.chunk_ms))
    }

    /// Bytes waiting for the next chunk
    pub fn pending(&self) -> usize {
        self.accumulated.len()
    }

    pub fn format(&self) -> Option<AudioFormat> {
        self.format
    }

    pub fn chunks_emitted(&self) -> u64 {
        self.chunks_emitted
    }

    /// Append a capture buffer and return every chunk that became complete.
    ///
    /// Empty buffers are ignored. When `format` differs from the format of the
    /// pending bytes, those bytes are flushed first as one irregular chunk
    /// tagged with the old format, and sizing switches to the new format.
    pub fn push(&mut self, data: &[u8], format: AudioFormat) -> Vec<PcmChunk> {
        let mut chunks = Vec::new();
        if data.is_empty() {
            return chunks;
        }

        if self.format.is_some_and(|current| current != format) {
            if let Some(chunk) = self.flush() {
                tracing::debug!(
                    "Capture format changed to {}, flushed {} pending bytes",
                    format,
                    chunk.data.len()
                );
                chunks.push(chunk);
            }
        }
        self.format = Some(format);
        self.accumulated.extend_from_slice(data);

        let target = format.chunk_bytes(self.chunk_ms);
        if target == 0 {
            // Unknown frame size: pass buffers through untouched
            chunks.push(PcmChunk::new(format, self.accumulated.split().freeze()));
        } else {
            while self.accumulated.len() >= target {
                let data = self.accumulated.split_to(target).freeze();
                chunks.push(PcmChunk::new(format, data));
            }
        }

        self.chunks_emitted += chunks.len() as u64;
        chunks
    }

    /// Emit whatever is pending as a final, possibly short, chunk
    pub fn flush(&mut self) -> Option<PcmChunk> {
        if self.accumulated.is_empty() {
            return None;
        }
        let format = self.format?;
        self.chunks_emitted += 1;
        Some(PcmChunk::new(format, self.accumulated.split().freeze()))
    }
}

impl Default for ChunkAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
