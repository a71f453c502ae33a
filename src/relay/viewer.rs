//! Viewer entries and their outbound transport
//!
//! A viewer's connection is represented by a [`ViewerSink`]. Writes are
//! non-blocking enqueues, so fan-out never waits on a slow socket; the socket
//! itself is drained by the connection's own writer task through a
//! [`ViewerOutbox`].

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use crate::constants::DEFAULT_VIEWER_VOLUME;
use crate::error::DeliveryError;
use crate::protocol::ViewerInfo;

pub type ViewerId = Uuid;

/// Outbound half of a viewer connection
pub trait ViewerSink: Send + Sync {
    /// Queue one serialized message for the viewer
    fn send(&self, frame: Arc<str>) -> Result<(), DeliveryError>;

    /// Ask the connection to shut down
    fn close(&self);
}

/// Sink backed by a bounded tokio channel
pub struct ChannelSink {
    tx: mpsc::Sender<Arc<str>>,
    closed: Arc<Notify>,
}

impl ChannelSink {
    /// Create a sink and the outbox its writer task drains
    pub fn channel(capacity: usize) -> (Self, ViewerOutbox) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let closed = Arc::new(Notify::new());
        (
            Self {
                tx,
                closed: closed.clone(),
            },
            ViewerOutbox { rx, closed },
        )
    }
}

impl ViewerSink for ChannelSink {
    fn send(&self, frame: Arc<str>) -> Result<(), DeliveryError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    fn close(&self) {
        self.closed.notify_one();
    }
}

/// Receiving half of a [`ChannelSink`]
pub struct ViewerOutbox {
    rx: mpsc::Receiver<Arc<str>>,
    closed: Arc<Notify>,
}

impl ViewerOutbox {
    /// Next queued frame; `None` once the sink was closed or dropped
    pub async fn next(&mut self) -> Option<Arc<str>> {
        tokio::select! {
            biased;
            _ = self.closed.notified() => None,
            frame = self.rx.recv() => frame,
        }
    }
}

/// A connected viewer
pub struct Viewer {
    pub id: ViewerId,
    sink: Arc<dyn ViewerSink>,
    pub selected_sources: HashSet<String>,
    pub volume: f32,
    pub connected_at: DateTime<Utc>,
}

impl Viewer {
    pub fn new(id: ViewerId, sink: Arc<dyn ViewerSink>) -> Self {
        Self {
            id,
            sink,
            selected_sources: HashSet::new(),
            volume: DEFAULT_VIEWER_VOLUME,
            connected_at: Utc::now(),
        }
    }

    pub fn is_subscribed(&self, source_id: &str) -> bool {
        self.selected_sources.contains(source_id)
    }

    pub fn sink(&self) -> Arc<dyn ViewerSink> {
        self.sink.clone()
    }

    pub fn info(&self) -> ViewerInfo {
        let mut selected: Vec<String> = self.selected_sources.iter().cloned().collect();
        selected.sort();
        ViewerInfo {
            id: self.id,
            selected_sources: selected,
            volume: self.volume,
            connected_at: self.connected_at,
        }
    }
}
