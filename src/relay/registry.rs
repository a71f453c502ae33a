//! Registry of audio sources and viewers
//!
//! Both tables live behind a single read-write lock. Lock scope is limited to
//! map reads and mutations; callers get copies (snapshots, sink handles) and
//! perform any I/O after the lock is released.

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::protocol::{AudioFormat, AudioSourceInfo, ViewerInfo};
use crate::relay::source::{AudioSource, SourceUpdate};
use crate::relay::viewer::{Viewer, ViewerId, ViewerSink};

/// Viewers subscribed to one source, copied out of the registry
pub struct Subscribers {
    pub source_name: String,
    pub format_label: String,
    pub sinks: Vec<(ViewerId, Arc<dyn ViewerSink>)>,
}

#[derive(Default)]
struct Inner {
    sources: HashMap<String, AudioSource>,
    viewers: HashMap<ViewerId, Viewer>,
}

/// Authoritative table of live sources and viewers
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Insert or refresh a source. Returns `true` the first time an id is seen.
    pub fn register_or_update_source(&self, update: SourceUpdate) -> bool {
        self.register_or_update_source_at(update, Instant::now())
    }

    pub fn register_or_update_source_at(&self, update: SourceUpdate, now: Instant) -> bool {
        let mut inner = self.inner.write();
        match inner.sources.get_mut(&update.id) {
            Some(source) => {
                source.record(update, now);
                false
            }
            None => {
                let source = AudioSource::new(update, now);
                tracing::info!("New audio source registered: {} ({})", source.name, source.id);
                inner.sources.insert(source.id.clone(), source);
                true
            }
        }
    }

    /// Add a viewer with an empty selection and full volume
    pub fn register_viewer(&self, sink: Arc<dyn ViewerSink>) -> ViewerId {
        let id = Uuid::new_v4();
        self.inner.write().viewers.insert(id, Viewer::new(id, sink));
        id
    }

    /// Replace a viewer's selection. Returns `false` for unknown viewers.
    pub fn update_viewer_selection<I>(&self, viewer_id: ViewerId, source_ids: I) -> bool
    where
        I: IntoIterator<Item = String>,
    {
        match self.inner.write().viewers.get_mut(&viewer_id) {
            Some(viewer) => {
                viewer.selected_sources = source_ids.into_iter().collect();
                true
            }
            None => false,
        }
    }

    /// Store a viewer's volume, clamped to [0, 1]. Non-finite values are ignored.
    pub fn update_viewer_volume(&self, viewer_id: ViewerId, volume: f32) -> bool {
        match self.inner.write().viewers.get_mut(&viewer_id) {
            Some(viewer) => {
                if volume.is_finite() {
                    viewer.volume = volume.clamp(0.0, 1.0);
                }
                true
            }
            None => false,
        }
    }

    /// Remove a viewer and close its connection. Idempotent.
    pub fn unregister_viewer(&self, viewer_id: ViewerId) -> bool {
        let removed = self.inner.write().viewers.remove(&viewer_id);
        match removed {
            Some(viewer) => {
                viewer.sink().close();
                true
            }
            None => false,
        }
    }

    /// Remove every viewer and close their connections
    pub fn close_all_viewers(&self) -> usize {
        let viewers: Vec<Viewer> = self.inner.write().viewers.drain().map(|(_, v)| v).collect();
        for viewer in &viewers {
            viewer.sink().close();
        }
        viewers.len()
    }

    /// Consistent copy of all sources, ordered by name then id
    pub fn snapshot(&self) -> Vec<AudioSourceInfo> {
        let mut sources: Vec<AudioSourceInfo> = self
            .inner
            .read()
            .sources
            .values()
            .map(AudioSource::info)
            .collect();
        sources.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        sources
    }

    /// Remove sources idle for longer than `timeout`; returns their names
    pub fn evict_stale(&self, timeout: Duration) -> Vec<String> {
        self.evict_stale_at(Instant::now(), timeout)
    }

    pub fn evict_stale_at(&self, now: Instant, timeout: Duration) -> Vec<String> {
        let mut evicted = Vec::new();
        self.inner.write().sources.retain(|id, source| {
            if source.is_stale(now, timeout) {
                tracing::info!("Removing stale audio source: {} ({})", source.name, id);
                evicted.push(source.name.clone());
                false
            } else {
                true
            }
        });
        evicted
    }

    /// Sinks of every viewer subscribed to `source_id`, or `None` if the
    /// source is not registered
    pub fn subscribers(&self, source_id: &str) -> Option<Subscribers> {
        let inner = self.inner.read();
        let source = inner.sources.get(source_id)?;
        let sinks = inner
            .viewers
            .values()
            .filter(|viewer| viewer.is_subscribed(source_id))
            .map(|viewer| (viewer.id, viewer.sink()))
            .collect();

        Some(Subscribers {
            source_name: source.name.clone(),
            format_label: source.format_label.clone(),
            sinks,
        })
    }

    /// Sinks of every connected viewer
    pub fn viewer_sinks(&self) -> Vec<(ViewerId, Arc<dyn ViewerSink>)> {
        self.inner
            .read()
            .viewers
            .values()
            .map(|viewer| (viewer.id, viewer.sink()))
            .collect()
    }

    pub fn viewer(&self, viewer_id: ViewerId) -> Option<ViewerInfo> {
        self.inner.read().viewers.get(&viewer_id).map(Viewer::info)
    }

    pub fn viewers(&self) -> Vec<ViewerInfo> {
        let mut viewers: Vec<ViewerInfo> =
            self.inner.read().viewers.values().map(Viewer::info).collect();
        viewers.sort_by_key(|v| v.connected_at);
        viewers
    }

    /// Most recent chunk of a source together with its format
    pub fn latest_chunk(&self, source_id: &str) -> Option<(AudioFormat, Bytes)> {
        self.inner
            .read()
            .sources
            .get(source_id)
            .map(|source| (source.format, source.current_chunk.clone()))
    }

    pub fn source_count(&self) -> usize {
        self.inner.read().sources.len()
    }

    pub fn viewer_count(&self) -> usize {
        self.inner.read().viewers.len()
    }

    /// Source and viewer counts read under one lock
    pub fn counts(&self) -> (usize, usize) {
        let inner = self.inner.read();
        (inner.sources.len(), inner.viewers.len())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
