//! Selective fan-out of inbound chunks
//!
//! Delivery is best effort and lossy by contract: nothing is retried or
//! buffered beyond each viewer's outbound queue. A full queue drops that one
//! frame for that one viewer; a closed connection removes only that viewer.

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::DeliveryError;
use crate::protocol::{AudioFormat, RelayCounters, RelayMessage, RelayedAudio, ViewerControl};
use crate::relay::registry::Registry;
use crate::relay::source::SourceUpdate;
use crate::relay::viewer::{ViewerId, ViewerSink};

/// Outcome of routing one chunk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// The chunk registered a previously unknown source
    pub new_source: bool,
    pub delivered: usize,
    /// Viewers whose queue was full
    pub dropped: usize,
    /// Viewers removed because their connection failed
    pub failed: usize,
}

/// Routes chunks from sources to subscribed viewers
pub struct Dispatcher {
    registry: Arc<Registry>,
    chunks_ingested: AtomicU64,
    frames_delivered: AtomicU64,
    frames_dropped: AtomicU64,
    viewers_dropped: AtomicU64,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            chunks_ingested: AtomicU64::new(0),
            frames_delivered: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            viewers_dropped: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Register a received chunk and deliver it to its subscribers.
    ///
    /// A first chunk from an unknown source triggers a client list broadcast
    /// before the audio itself is delivered.
    pub fn ingest(&self, update: SourceUpdate) -> DispatchReport {
        let source_id = update.id.clone();
        let format = update.format;
        let chunk = update.chunk.clone();

        let new_source = self.registry.register_or_update_source(update);
        self.chunks_ingested.fetch_add(1, Ordering::Relaxed);

        if new_source {
            self.broadcast_source_list();
        }

        DispatchReport {
            new_source,
            ..self.dispatch_audio(&source_id, format, chunk)
        }
    }

    /// Deliver one chunk of `source_id` to every viewer that selected it
    pub fn dispatch_audio(&self, source_id: &str, format: AudioFormat, chunk: Bytes) -> DispatchReport {
        let mut report = DispatchReport::default();

        // Sinks are copied out so no lock is held while writing
        let Some(subscribers) = self.registry.subscribers(source_id) else {
            return report;
        };
        if subscribers.sinks.is_empty() {
            return report;
        }

        let message = RelayMessage::Audio(RelayedAudio::new(
            source_id,
            &subscribers.source_name,
            format,
            chunk,
        )
        .with_format_label(subscribers.format_label));
        let frame: Arc<str> = match message.to_json() {
            Ok(json) => json.into(),
            Err(e) => {
                tracing::warn!("Failed to encode audio from {}: {}", source_id, e);
                return report;
            }
        };

        let failed = self.fan_out(&subscribers.sinks, &frame, &mut report);
        self.drop_viewers(&failed);

        tracing::trace!(
            "Chunk from {} delivered to {} viewers ({} dropped, {} failed)",
            source_id,
            report.delivered,
            report.dropped,
            report.failed
        );
        report
    }

    /// Push the current client list to every viewer; returns how many got it
    pub fn broadcast_source_list(&self) -> usize {
        let Some(frame) = self.source_list_frame() else {
            return 0;
        };

        let sinks = self.registry.viewer_sinks();
        let mut report = DispatchReport::default();
        let failed = self.fan_out(&sinks, &frame, &mut report);
        self.drop_viewers(&failed);
        report.delivered
    }

    /// Serialized `clientList` message for the current registry
    pub fn source_list_frame(&self) -> Option<Arc<str>> {
        let message = RelayMessage::ClientList {
            audio_clients: self.registry.snapshot(),
        };
        match message.to_json() {
            Ok(json) => Some(json.into()),
            Err(e) => {
                tracing::warn!("Failed to encode client list: {}", e);
                None
            }
        }
    }

    /// Apply a control message from a viewer; returns the reply to send back
    pub fn handle_control(&self, viewer_id: ViewerId, message: ViewerControl) -> Option<RelayMessage> {
        match message {
            ViewerControl::SelectSources { selected_sources } => {
                let selected: Vec<String> = selected_sources
                    .into_iter()
                    .filter_map(|(id, wanted)| wanted.then_some(id))
                    .collect();
                tracing::debug!("Viewer {} selected sources: {:?}", viewer_id, selected);
                self.registry.update_viewer_selection(viewer_id, selected);
                None
            }

            ViewerControl::SetVolume { volume } => {
                if !volume.is_finite() {
                    tracing::warn!("Viewer {} sent invalid volume {}", viewer_id, volume);
                }
                self.registry.update_viewer_volume(viewer_id, volume);
                None
            }

            ViewerControl::RequestClientList => Some(RelayMessage::ClientList {
                audio_clients: self.registry.snapshot(),
            }),

            ViewerControl::WatchClients { .. } => {
                tracing::debug!("Viewer {} started watching the client list", viewer_id);
                None
            }

            ViewerControl::Ping => Some(RelayMessage::Pong),
        }
    }

    pub fn counters(&self) -> RelayCounters {
        RelayCounters {
            chunks_ingested: self.chunks_ingested.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            viewers_dropped: self.viewers_dropped.load(Ordering::Relaxed),
        }
    }

    /// Write `frame` to each sink independently; returns viewers whose
    /// connection is gone
    fn fan_out(
        &self,
        sinks: &[(ViewerId, Arc<dyn ViewerSink>)],
        frame: &Arc<str>,
        report: &mut DispatchReport,
    ) -> Vec<ViewerId> {
        let mut failed = Vec::new();

        for (viewer_id, sink) in sinks {
            match sink.send(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::Full) => {
                    tracing::trace!("Viewer {} queue full, frame dropped", viewer_id);
                    report.dropped += 1;
                }
                Err(DeliveryError::Closed) => failed.push(*viewer_id),
            }
        }
        report.failed = failed.len();

        self.frames_delivered.fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.frames_dropped.fetch_add(report.dropped as u64, Ordering::Relaxed);
        failed
    }

    fn drop_viewers(&self, viewer_ids: &[ViewerId]) {
        for viewer_id in viewer_ids {
            if self.registry.unregister_viewer(*viewer_id) {
                tracing::warn!("Failed to write to viewer {}, connection removed", viewer_id);
                self.viewers_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicBool;

    /// Sink recording every frame, optionally failing or full
    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<Arc<str>>>,
        broken: AtomicBool,
        full: AtomicBool,
        closed: AtomicBool,
    }

    impl RecordingSink {
        fn broken() -> Arc<Self> {
            let sink = Self::default();
            sink.broken.store(true, Ordering::SeqCst);
            Arc::new(sink)
        }

        fn messages(&self) -> Vec<serde_json::Value> {
            self.frames
                .lock()
                .iter()
                .map(|f| serde_json::from_str(f).unwrap())
                .collect()
        }

        fn audio_from(&self) -> Vec<String> {
            self.messages()
                .into_iter()
                .filter(|m| m["type"] == "audio")
                .map(|m| m["clientId"].as_str().unwrap().to_string())
                .collect()
        }
    }

    impl ViewerSink for RecordingSink {
        fn send(&self, frame: Arc<str>) -> Result<(), DeliveryError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(DeliveryError::Closed);
            }
            if self.full.load(Ordering::SeqCst) {
                return Err(DeliveryError::Full);
            }
            self.frames.lock().push(frame);
            Ok(())
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    const FORMAT: AudioFormat = AudioFormat::new(48_000, 1, 16);

    fn chunk(id: &str) -> SourceUpdate {
        SourceUpdate::new(id, FORMAT, Bytes::from_static(&[1, 0, 2, 0]))
    }

    fn select(dispatcher: &Dispatcher, viewer: ViewerId, ids: &[&str]) {
        let selected: HashMap<String, bool> = ids.iter().map(|id| (id.to_string(), true)).collect();
        dispatcher.handle_control(viewer, ViewerControl::SelectSources { selected_sources: selected });
    }

    #[test]
    fn test_selective_fan_out() {
        let dispatcher = Dispatcher::new(Arc::new(Registry::new()));
        dispatcher.ingest(chunk("A"));
        dispatcher.ingest(chunk("B"));

        let v1_sink = Arc::new(RecordingSink::default());
        let v2_sink = Arc::new(RecordingSink::default());
        let v1 = dispatcher.registry().register_viewer(v1_sink.clone());
        let v2 = dispatcher.registry().register_viewer(v2_sink.clone());
        select(&dispatcher, v1, &["A"]);
        select(&dispatcher, v2, &["A", "B"]);

        let report = dispatcher.ingest(chunk("B"));
        assert_eq!(report.delivered, 1);
        assert!(v1_sink.audio_from().is_empty());
        assert_eq!(v2_sink.audio_from(), vec!["B"]);

        let report = dispatcher.ingest(chunk("A"));
        assert_eq!(report.delivered, 2);
        assert_eq!(v1_sink.audio_from(), vec!["A"]);
        assert_eq!(v2_sink.audio_from(), vec!["B", "A"]);
    }

    #[test]
    fn test_deselected_source_not_delivered() {
        let dispatcher = Dispatcher::new(Arc::new(Registry::new()));
        dispatcher.ingest(chunk("A"));

        let sink = Arc::new(RecordingSink::default());
        let viewer = dispatcher.registry().register_viewer(sink.clone());
        let mut selection = HashMap::new();
        selection.insert("A".to_string(), false);
        dispatcher.handle_control(viewer, ViewerControl::SelectSources { selected_sources: selection });

        assert_eq!(dispatcher.ingest(chunk("A")).delivered, 0);
        assert!(sink.audio_from().is_empty());
    }

    #[test]
    fn test_failed_viewer_is_isolated() {
        let dispatcher = Dispatcher::new(Arc::new(Registry::new()));
        dispatcher.ingest(chunk("A"));

        let v1_sink = RecordingSink::broken();
        let v2_sink = Arc::new(RecordingSink::default());
        let v1 = dispatcher.registry().register_viewer(v1_sink.clone());
        let v2 = dispatcher.registry().register_viewer(v2_sink.clone());
        select(&dispatcher, v1, &["A"]);
        select(&dispatcher, v2, &["A"]);

        let report = dispatcher.ingest(chunk("A"));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(v2_sink.audio_from(), vec!["A"]);

        let registry = dispatcher.registry();
        assert!(registry.viewer(v1).is_none());
        assert!(registry.viewer(v2).is_some());
        assert!(v1_sink.closed.load(Ordering::SeqCst));
        assert_eq!(dispatcher.counters().viewers_dropped, 1);
    }

    #[test]
    fn test_full_queue_drops_frame_only() {
        let dispatcher = Dispatcher::new(Arc::new(Registry::new()));
        dispatcher.ingest(chunk("A"));

        let sink = Arc::new(RecordingSink::default());
        let viewer = dispatcher.registry().register_viewer(sink.clone());
        select(&dispatcher, viewer, &["A"]);

        sink.full.store(true, Ordering::SeqCst);
        let report = dispatcher.ingest(chunk("A"));
        assert_eq!(report.dropped, 1);
        assert!(dispatcher.registry().viewer(viewer).is_some());

        sink.full.store(false, Ordering::SeqCst);
        assert_eq!(dispatcher.ingest(chunk("A")).delivered, 1);
        assert_eq!(dispatcher.counters().frames_dropped, 1);
    }

    #[test]
    fn test_new_source_broadcasts_list() {
        let dispatcher = Dispatcher::new(Arc::new(Registry::new()));
        let sink = Arc::new(RecordingSink::default());
        dispatcher.registry().register_viewer(sink.clone());

        let report = dispatcher.ingest(chunk("m1").with_name(Some("Desk".into())));
        assert!(report.new_source);
        assert!(!dispatcher.ingest(chunk("m1")).new_source);

        let messages = sink.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["type"], "clientList");
        assert_eq!(messages[0]["audioClients"][0]["id"], "m1");
        assert_eq!(messages[0]["audioClients"][0]["name"], "Desk");
        assert_eq!(dispatcher.counters().chunks_ingested, 2);
    }

    #[test]
    fn test_audio_message_content() {
        let dispatcher = Dispatcher::new(Arc::new(Registry::new()));
        dispatcher.ingest(chunk("m1"));
        let sink = Arc::new(RecordingSink::default());
        let viewer = dispatcher.registry().register_viewer(sink.clone());
        select(&dispatcher, viewer, &["m1"]);

        dispatcher.ingest(chunk("m1"));
        let audio = &sink.messages()[0];
        assert_eq!(audio["type"], "audio");
        assert_eq!(audio["audioData"], "AQACAA==");
        assert_eq!(audio["clientName"], "Machine m1");
        assert_eq!(audio["sampleRate"], 48_000);
        assert_eq!(audio["channels"], 1);
        assert_eq!(audio["bitsPerSample"], 16);
        assert_eq!(audio["format"], "pcm");

        dispatcher.ingest(chunk("m1").with_format_label(Some("pcm_f32le".into())));
        assert_eq!(sink.messages()[1]["format"], "pcm_f32le");
    }

    #[test]
    fn test_control_replies() {
        let dispatcher = Dispatcher::new(Arc::new(Registry::new()));
        let viewer = dispatcher
            .registry()
            .register_viewer(Arc::new(RecordingSink::default()));

        assert!(matches!(
            dispatcher.handle_control(viewer, ViewerControl::Ping),
            Some(RelayMessage::Pong)
        ));
        assert!(matches!(
            dispatcher.handle_control(viewer, ViewerControl::RequestClientList),
            Some(RelayMessage::ClientList { .. })
        ));
        assert!(dispatcher
            .handle_control(viewer, ViewerControl::SetVolume { volume: 0.3 })
            .is_none());
        assert_eq!(dispatcher.registry().viewer(viewer).unwrap().volume, 0.3);
        assert!(dispatcher
            .handle_control(viewer, ViewerControl::WatchClients { watch_clients: true })
            .is_none());
    }
}
