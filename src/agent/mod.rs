//! Capture agent: turns local audio into chunks and uploads them to a relay

pub mod capture;
pub mod machine_id;
pub mod pipeline;
pub mod uploader;

pub use capture::{CaptureBuffer, CaptureSource, ToneSource};
#[cfg(feature = "device-capture")]
pub use capture::DeviceSource;
pub use machine_id::{derive_machine_id, machine_id};
pub use pipeline::{AgentStats, CaptureAgent, ChunkPipeline};
pub use uploader::Uploader;
