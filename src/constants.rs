//! Shared constants for the relay and the capture agent

use std::time::Duration;

/// Default HTTP/WebSocket port of the relay
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Default relay URL used by the capture agent
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080";

/// Target chunk duration in milliseconds (~20ms of audio per network send)
pub const DEFAULT_CHUNK_MS: u32 = 20;

/// Sources not heard from within this window are evicted
pub const SOURCE_TIMEOUT: Duration = Duration::from_secs(60);

/// Interval of the stale-source sweep
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Interval of the periodic client list broadcast
pub const LIST_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Interval of client list pushes on the `/ws/clients` watcher socket
pub const WATCH_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Outbound frames queued per viewer before frames start being dropped
pub const VIEWER_QUEUE_CAPACITY: usize = 256;

/// Volume assigned to a freshly connected viewer
pub const DEFAULT_VIEWER_VOLUME: f32 = 1.0;

/// Upper bound for a single ingestion request body
pub const MAX_INGEST_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Chunks waiting for upload on the agent side
pub const UPLOAD_QUEUE_CAPACITY: usize = 64;

/// Raw capture buffers waiting for the chunking thread
pub const CAPTURE_QUEUE_CAPACITY: usize = 256;

/// HTTP timeout of the agent's uploader
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Format of the synthetic tone source
pub const DEFAULT_TONE_SAMPLE_RATE: u32 = 48_000;
pub const DEFAULT_TONE_CHANNELS: u16 = 1;
pub const DEFAULT_TONE_BITS: u16 = 16;
pub const DEFAULT_TONE_HZ: f32 = 440.0;

/// Payload format label carried on the wire
pub const PCM_FORMAT_LABEL: &str = "pcm";

/// Header used to identify agents that do not send a machine id
pub const CLIENT_ID_HEADER: &str = "x-client-id";
