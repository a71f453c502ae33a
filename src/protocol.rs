//! Wire messages exchanged between capture agents, the relay and viewers
//!
//! All messages are JSON objects discriminated by a `type` field. Audio
//! payloads travel as standard base64 (padded), the same encoding the capture
//! agents have always used for raw byte arrays.
//!
//! ```text
//! agent  ──POST /audio──▶ relay     {type:"audio", audioData, sampleRate, channels,
//!                                    bitsPerSample, format?, clientName?, machineId?}
//! viewer ──── /ws ─────▶ relay     {type:"selectSources" | "setVolume" |
//!                                    "requestClientList" | "watchClients" | "ping"}
//! relay  ──── /ws ─────▶ viewer    {type:"audio" | "clientList" | "pong"}
//! ```

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::constants::PCM_FORMAT_LABEL;

/// PCM format descriptor travelling with every chunk.
///
/// 32-bit samples are IEEE floats (the shared-mode mix format of capture
/// devices); 8, 16 and 24-bit samples are integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl AudioFormat {
    pub const fn new(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample,
        }
    }

    /// Bytes per single-channel sample
    pub fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample / 8) as usize
    }

    /// Bytes per frame (one sample for every channel)
    pub fn block_align(&self) -> usize {
        self.channels as usize * self.bytes_per_sample()
    }

    pub fn is_float(&self) -> bool {
        self.bits_per_sample == 32
    }

    pub fn is_valid(&self) -> bool {
        self.sample_rate > 0
            && self.channels > 0
            && matches!(self.bits_per_sample, 8 | 16 | 24 | 32)
    }

    /// Frames in one chunk of `chunk_ms` milliseconds, never less than one
    pub fn frames_per_chunk(&self, chunk_ms: u32) -> usize {
        let frames = self.sample_rate as u64 * chunk_ms as u64 / 1000;
        frames.max(1) as usize
    }

    /// Size in bytes of one chunk of `chunk_ms` milliseconds
    pub fn chunk_bytes(&self, chunk_ms: u32) -> usize {
        self.frames_per_chunk(chunk_ms) * self.block_align()
    }

    /// Playback duration of `len` bytes in this format
    pub fn duration_of(&self, len: usize) -> Duration {
        let block_align = self.block_align();
        if block_align == 0 || self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let frames = (len / block_align) as u64;
        Duration::from_micros(frames * 1_000_000 / self.sample_rate as u64)
    }

    pub fn with_bits(self, bits_per_sample: u16) -> Self {
        Self {
            bits_per_sample,
            ..self
        }
    }

    pub fn with_channels(self, channels: u16) -> Self {
        Self { channels, ..self }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Hz/{}ch/{}bit",
            self.sample_rate, self.channels, self.bits_per_sample
        )
    }
}

/// Serde adapter encoding raw bytes as a base64 string
mod base64_payload {
    use bytes::Bytes;
    use data_encoding::BASE64;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        // Agents with nothing captured serialize an empty slice as null
        match Option::<String>::deserialize(deserializer)? {
            Some(text) => BASE64
                .decode(text.as_bytes())
                .map(Bytes::from)
                .map_err(de::Error::custom),
            None => Ok(Bytes::new()),
        }
    }
}

fn audio_type() -> String {
    "audio".to_string()
}

/// One chunk posted by a capture agent to `/audio`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestMessage {
    #[serde(rename = "type", default = "audio_type")]
    pub kind: String,

    #[serde(with = "base64_payload", default)]
    pub audio_data: Bytes,

    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,
}

impl IngestMessage {
    /// Build an ingestion message for a chunk
    pub fn audio(
        data: Bytes,
        format: AudioFormat,
        client_name: Option<String>,
        machine_id: String,
    ) -> Self {
        Self {
            kind: audio_type(),
            audio_data: data,
            sample_rate: format.sample_rate,
            channels: format.channels,
            bits_per_sample: format.bits_per_sample,
            format: Some(PCM_FORMAT_LABEL.to_string()),
            client_name,
            machine_id: Some(machine_id),
        }
    }

    /// Format descriptor declared by the agent
    pub fn audio_format(&self) -> AudioFormat {
        AudioFormat::new(self.sample_rate, self.channels, self.bits_per_sample)
    }
}

/// Control messages sent by a viewer over `/ws`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ViewerControl {
    /// Replace the viewer's selection with every id mapped to `true`
    #[serde(rename_all = "camelCase")]
    SelectSources {
        #[serde(default)]
        selected_sources: HashMap<String, bool>,
    },

    /// Playback volume, applied by the viewer itself
    SetVolume {
        #[serde(default)]
        volume: f32,
    },

    /// Ask for an immediate client list
    RequestClientList,

    /// Announce interest in list updates (these are pushed anyway)
    #[serde(rename_all = "camelCase")]
    WatchClients {
        #[serde(default)]
        watch_clients: bool,
    },

    /// Keepalive
    Ping,
}

/// Messages sent by the relay to viewers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RelayMessage {
    /// One chunk of a selected source
    Audio(RelayedAudio),

    /// Current source registry
    #[serde(rename_all = "camelCase")]
    ClientList { audio_clients: Vec<AudioSourceInfo> },

    /// Reply to `ping`
    Pong,
}

impl RelayMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Audio chunk as delivered to a viewer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayedAudio {
    #[serde(with = "base64_payload")]
    pub audio_data: Bytes,
    pub sample_rate: u32,
    pub channels: u16,
    pub format: String,
    pub bits_per_sample: u16,
    pub client_id: String,
    pub client_name: String,
}

impl RelayedAudio {
    pub fn new(source_id: &str, source_name: &str, format: AudioFormat, data: Bytes) -> Self {
        Self {
            audio_data: data,
            sample_rate: format.sample_rate,
            channels: format.channels,
            format: PCM_FORMAT_LABEL.to_string(),
            bits_per_sample: format.bits_per_sample,
            client_id: source_id.to_string(),
            client_name: source_name.to_string(),
        }
    }

    /// Replace the default `pcm` encoding label
    pub fn with_format_label(mut self, label: impl Into<String>) -> Self {
        self.format = label.into();
        self
    }
}

/// Snapshot of one registered source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioSourceInfo {
    pub id: String,
    pub name: String,
    pub last_seen: DateTime<Utc>,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub format: String,
    pub packet_count: u64,
}

impl AudioSourceInfo {
    pub fn audio_format(&self) -> AudioFormat {
        AudioFormat::new(self.sample_rate, self.channels, self.bits_per_sample)
    }
}

/// Snapshot of one connected viewer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerInfo {
    pub id: Uuid,
    pub selected_sources: Vec<String>,
    pub volume: f32,
    pub connected_at: DateTime<Utc>,
}

/// Relay-wide delivery counters
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayCounters {
    pub chunks_ingested: u64,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub viewers_dropped: u64,
}

/// Body of `GET /api/stats`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub total_audio_clients: usize,
    pub total_browser_clients: usize,
    pub audio_clients: Vec<AudioSourceInfo>,
    pub browser_clients: Vec<ViewerInfo>,
    pub counters: RelayCounters,
    pub timestamp: String,
}

/// Body of `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub port: u16,
    pub audio_clients: usize,
    pub browser_clients: usize,
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_align_and_chunk_size() {
        let format = AudioFormat::new(48_000, 2, 16);
        assert_eq!(format.block_align(), 4);
        assert_eq!(format.chunk_bytes(20), 48_000 * 4 / 50);

        // 11025 Hz is not divisible by 50; chunks stay frame aligned
        let odd = AudioFormat::new(11_025, 1, 16);
        assert_eq!(odd.chunk_bytes(20) % odd.block_align(), 0);
        assert_eq!(odd.frames_per_chunk(20), 220);
    }

    #[test]
    fn test_format_validity() {
        assert!(AudioFormat::new(44_100, 2, 32).is_valid());
        assert!(!AudioFormat::new(0, 2, 16).is_valid());
        assert!(!AudioFormat::new(44_100, 0, 16).is_valid());
        assert!(!AudioFormat::new(44_100, 2, 12).is_valid());
    }

    #[test]
    fn test_ingest_message_decodes_agent_payload() {
        let json = r#"{
            "type": "audio",
            "audioData": "AQIDBA==",
            "sampleRate": 48000,
            "channels": 1,
            "format": "pcm",
            "bitsPerSample": 16,
            "machineId": "m1"
        }"#;

        let msg: IngestMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.audio_data.as_ref(), &[1, 2, 3, 4]);
        assert_eq!(msg.audio_format(), AudioFormat::new(48_000, 1, 16));
        assert_eq!(msg.machine_id.as_deref(), Some("m1"));
        assert!(msg.client_name.is_none());
    }

    #[test]
    fn test_ingest_message_null_payload() {
        let json = r#"{"audioData":null,"sampleRate":8000,"channels":1,"bitsPerSample":8}"#;
        let msg: IngestMessage = serde_json::from_str(json).unwrap();
        assert!(msg.audio_data.is_empty());
        assert_eq!(msg.kind, "audio");
    }

    #[test]
    fn test_ingest_message_rejects_bad_base64() {
        let json = r#"{"audioData":"***","sampleRate":8000,"channels":1,"bitsPerSample":8}"#;
        assert!(serde_json::from_str::<IngestMessage>(json).is_err());
    }

    #[test]
    fn test_viewer_control_variants() {
        let select: ViewerControl =
            serde_json::from_str(r#"{"type":"selectSources","selectedSources":{"a":true,"b":false}}"#)
                .unwrap();
        match select {
            ViewerControl::SelectSources { selected_sources } => {
                assert_eq!(selected_sources.get("a"), Some(&true));
                assert_eq!(selected_sources.get("b"), Some(&false));
            }
            other => panic!("unexpected {:?}", other),
        }

        let volume: ViewerControl =
            serde_json::from_str(r#"{"type":"setVolume","volume":0.25}"#).unwrap();
        assert_eq!(volume, ViewerControl::SetVolume { volume: 0.25 });

        let watch: ViewerControl =
            serde_json::from_str(r#"{"type":"watchClients","watchClients":true}"#).unwrap();
        assert_eq!(watch, ViewerControl::WatchClients { watch_clients: true });

        assert_eq!(
            serde_json::from_str::<ViewerControl>(r#"{"type":"ping"}"#).unwrap(),
            ViewerControl::Ping
        );
        assert_eq!(
            serde_json::from_str::<ViewerControl>(r#"{"type":"requestClientList"}"#).unwrap(),
            ViewerControl::RequestClientList
        );
        assert!(serde_json::from_str::<ViewerControl>(r#"{"type":"explode"}"#).is_err());
    }

    #[test]
    fn test_relay_audio_shape() {
        let msg = RelayMessage::Audio(RelayedAudio::new(
            "m1",
            "Studio",
            AudioFormat::new(48_000, 2, 16),
            Bytes::from_static(&[0, 1]),
        ));
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "audio");
        assert_eq!(value["audioData"], "AAE=");
        assert_eq!(value["clientId"], "m1");
        assert_eq!(value["clientName"], "Studio");
        assert_eq!(value["sampleRate"], 48_000);
        assert_eq!(value["bitsPerSample"], 16);
        assert_eq!(value["format"], "pcm");
    }

    #[test]
    fn test_pong_and_client_list_shape() {
        let pong: serde_json::Value =
            serde_json::from_str(&RelayMessage::Pong.to_json().unwrap()).unwrap();
        assert_eq!(pong, serde_json::json!({"type": "pong"}));

        let list = RelayMessage::ClientList {
            audio_clients: Vec::new(),
        };
        let value: serde_json::Value = serde_json::from_str(&list.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "clientList");
        assert!(value["audioClients"].as_array().unwrap().is_empty());
    }
}
