//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::*;
use crate::protocol::AudioFormat;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Relay server configuration
    pub relay: RelayConfig,

    /// Capture agent configuration
    pub agent: AgentConfig,
}

/// Relay server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Local bind address
    pub bind_address: String,

    /// HTTP/WebSocket port
    pub port: u16,

    /// Enable CORS
    pub enable_cors: bool,

    /// Directory served at `/` instead of the built-in viewer page
    pub static_dir: Option<PathBuf>,

    /// Sources idle for longer than this are evicted
    pub source_timeout_secs: u64,

    pub sweep_interval_secs: u64,

    pub list_refresh_secs: u64,

    /// Push interval of the `/ws/clients` watcher
    pub watch_refresh_secs: u64,

    /// Outbound frames buffered per viewer
    pub viewer_queue_capacity: usize,

    /// Largest accepted `/audio` request body
    pub max_body_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_HTTP_PORT,
            enable_cors: true,
            static_dir: None,
            source_timeout_secs: SOURCE_TIMEOUT.as_secs(),
            sweep_interval_secs: SWEEP_INTERVAL.as_secs(),
            list_refresh_secs: LIST_REFRESH_INTERVAL.as_secs(),
            watch_refresh_secs: WATCH_REFRESH_INTERVAL.as_secs(),
            viewer_queue_capacity: VIEWER_QUEUE_CAPACITY,
            max_body_bytes: MAX_INGEST_BODY_BYTES,
        }
    }
}

impl RelayConfig {
    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn list_refresh(&self) -> Duration {
        Duration::from_secs(self.list_refresh_secs.max(1))
    }

    pub fn watch_refresh(&self) -> Duration {
        Duration::from_secs(self.watch_refresh_secs.max(1))
    }

    /// Apply `PORT` from the environment
    pub fn apply_env(&mut self) {
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            self.port = port;
        }
    }
}

/// Where the agent takes its audio from
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CaptureKind {
    /// Synthetic sine wave
    #[default]
    Tone,
    /// Default input device
    Device,
}

/// Capture agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Relay base URL
    pub server_url: String,

    /// Display name announced to viewers
    pub client_name: Option<String>,

    /// Overrides the derived machine id
    pub machine_id: Option<String>,

    /// Chunk duration in milliseconds
    pub chunk_ms: u32,

    pub source: CaptureKind,

    /// Frequency of the synthetic tone
    pub tone_hz: f32,

    /// Convert float capture to 16-bit before upload
    pub convert_to_pcm16: bool,

    /// Channel count to down/up-mix to before upload
    pub target_channels: Option<u16>,

    /// Chunks queued for upload before new chunks are dropped
    pub upload_queue: usize,

    pub request_timeout_secs: u64,

    /// Format of the synthetic tone
    pub tone_format: AudioFormat,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            client_name: None,
            machine_id: None,
            chunk_ms: DEFAULT_CHUNK_MS,
            source: CaptureKind::Tone,
            tone_hz: DEFAULT_TONE_HZ,
            convert_to_pcm16: false,
            target_channels: None,
            upload_queue: UPLOAD_QUEUE_CAPACITY,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            tone_format: AudioFormat::new(
                DEFAULT_TONE_SAMPLE_RATE,
                DEFAULT_TONE_CHANNELS,
                DEFAULT_TONE_BITS,
            ),
        }
    }
}

impl AgentConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Format chunks are uploaded in, given the captured format
    pub fn upload_format(&self, captured: AudioFormat) -> AudioFormat {
        let mut format = captured;
        if self.convert_to_pcm16 {
            format = format.with_bits(16);
        }
        if let Some(channels) = self.target_channels {
            format = format.with_channels(channels);
        }
        format
    }

    /// Apply `SERVER_URL` and `CLIENT_NAME` from the environment
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("SERVER_URL") {
            if !url.is_empty() {
                self.server_url = url;
            }
        }
        if let Ok(name) = std::env::var("CLIENT_NAME") {
            if !name.is_empty() {
                self.client_name = Some(name);
            }
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load(path: &PathBuf) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &PathBuf) -> crate::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "audio-relay", "audio-relay")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load `path`, or the default location if it exists, or defaults
    pub fn load_or_default(path: Option<&PathBuf>) -> crate::Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading configuration from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }
}
