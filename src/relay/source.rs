//! Audio source entries of the registry

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

use crate::constants::PCM_FORMAT_LABEL;
use crate::protocol::{AudioFormat, AudioSourceInfo};

/// Prefix of ids generated by the relay for agents that did not identify
/// themselves
pub const GENERATED_ID_PREFIX: &str = "client_";

/// One received chunk, as seen by the registry
#[derive(Debug, Clone)]
pub struct SourceUpdate {
    pub id: String,
    pub name: Option<String>,
    pub format: AudioFormat,
    /// Encoding label declared by the agent
    pub format_label: Option<String>,
    pub chunk: Bytes,
}

impl SourceUpdate {
    pub fn new(id: impl Into<String>, format: AudioFormat, chunk: Bytes) -> Self {
        Self {
            id: id.into(),
            name: None,
            format,
            format_label: None,
            chunk,
        }
    }

    pub fn with_format_label(mut self, label: Option<String>) -> Self {
        self.format_label = label.filter(|l| !l.trim().is_empty());
        self
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name.filter(|n| !n.trim().is_empty());
        self
    }
}

/// A registered audio producer
#[derive(Debug, Clone)]
pub struct AudioSource {
    pub id: String,
    pub name: String,
    pub format: AudioFormat,
    pub format_label: String,
    /// Monotonic clock reading of the last chunk, drives eviction
    pub last_seen: Instant,
    /// Wall clock time of the last chunk, for display
    pub last_seen_at: DateTime<Utc>,
    pub packet_count: u64,
    pub current_chunk: Bytes,
}

impl AudioSource {
    /// Create the entry for the first chunk of a previously unseen id
    pub fn new(update: SourceUpdate, now: Instant) -> Self {
        let name = update
            .name
            .unwrap_or_else(|| default_display_name(&update.id));

        Self {
            id: update.id,
            name,
            format: update.format,
            format_label: update
                .format_label
                .unwrap_or_else(|| PCM_FORMAT_LABEL.to_string()),
            last_seen: now,
            last_seen_at: Utc::now(),
            packet_count: 1,
            current_chunk: update.chunk,
        }
    }

    /// Record a subsequent chunk
    pub fn record(&mut self, update: SourceUpdate, now: Instant) {
        if let Some(name) = update.name {
            self.name = name;
        }
        self.format = update.format;
        if let Some(label) = update.format_label {
            self.format_label = label;
        }
        self.last_seen = self.last_seen.max(now);
        self.last_seen_at = Utc::now();
        self.packet_count += 1;
        self.current_chunk = update.chunk;
    }

    /// True when nothing was heard for longer than `timeout`
    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }

    pub fn info(&self) -> AudioSourceInfo {
        AudioSourceInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            last_seen: self.last_seen_at,
            sample_rate: self.format.sample_rate,
            channels: self.format.channels,
            bits_per_sample: self.format.bits_per_sample,
            format: self.format_label.clone(),
            packet_count: self.packet_count,
        }
    }
}

/// Label used when an agent does not send a client name
pub fn default_display_name(id: &str) -> String {
    if id.starts_with(GENERATED_ID_PREFIX) {
        return anonymous_display_name(id);
    }
    format!("Machine {}", id.chars().take(8).collect::<String>())
}

/// Label for agents identified only by a header or a generated id
pub fn anonymous_display_name(id: &str) -> String {
    let start = id.char_indices().rev().nth(7).map_or(0, |(i, _)| i);
    format!("Audio Client {}", &id[start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_names() {
        assert_eq!(default_display_name("0123456789abcdef"), "Machine 01234567");
        assert_eq!(default_display_name("m1"), "Machine m1");
        assert_eq!(
            default_display_name("client_aaaaaaaa12345678"),
            "Audio Client 12345678"
        );
        assert_eq!(anonymous_display_name("abc"), "Audio Client abc");
    }

    #[test]
    fn test_record_updates_entry() {
        let start = Instant::now();
        let first = SourceUpdate::new("m1", AudioFormat::new(48_000, 1, 16), Bytes::from_static(&[1]));
        let mut source = AudioSource::new(first, start);
        assert_eq!(source.name, "Machine m1");

        let second = SourceUpdate::new("m1", AudioFormat::new(44_100, 2, 32), Bytes::from_static(&[2]))
            .with_name(Some("Studio".into()));
        source.record(second, start + Duration::from_secs(1));

        assert_eq!(source.name, "Studio");
        assert_eq!(source.format, AudioFormat::new(44_100, 2, 32));
        assert_eq!(source.packet_count, 2);
        assert_eq!(source.current_chunk.as_ref(), &[2]);
        assert!(!source.is_stale(start + Duration::from_secs(61), Duration::from_secs(60)));
        assert!(source.is_stale(start + Duration::from_secs(62), Duration::from_secs(60)));
    }

    #[test]
    fn test_blank_name_ignored() {
        let update = SourceUpdate::new("m1", AudioFormat::new(8_000, 1, 8), Bytes::new())
            .with_name(Some("  ".into()));
        assert!(update.name.is_none());
    }

    #[test]
    fn test_format_label_defaults_and_follows_updates() {
        let start = Instant::now();
        let format = AudioFormat::new(48_000, 1, 16);
        let mut source = AudioSource::new(SourceUpdate::new("m1", format, Bytes::new()), start);
        assert_eq!(source.info().format, "pcm");

        source.record(
            SourceUpdate::new("m1", format, Bytes::new()).with_format_label(Some("pcm_s16le".into())),
            start,
        );
        assert_eq!(source.info().format, "pcm_s16le");

        // An update without a label keeps the last one
        source.record(SourceUpdate::new("m1", format, Bytes::new()), start);
        assert_eq!(source.format_label, "pcm_s16le");
    }
}
