//! PCM handling shared by the capture agent and the relay
//!
//! Contains the chunk accumulator and the format normalizer.

pub mod accumulator;
pub mod convert;

pub use accumulator::{ChunkAccumulator, PcmChunk};
pub use convert::{convert, needs_conversion};
