//! Periodic maintenance of the registry

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::relay::dispatcher::Dispatcher;

/// Evicts sources that stopped sending
pub struct Sweeper {
    dispatcher: Arc<Dispatcher>,
    timeout: Duration,
}

impl Sweeper {
    pub fn new(dispatcher: Arc<Dispatcher>, timeout: Duration) -> Self {
        Self { dispatcher, timeout }
    }

    /// Run one eviction pass; returns the names of removed sources
    pub fn sweep(&self) -> Vec<String> {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> Vec<String> {
        let evicted = self.dispatcher.registry().evict_stale_at(now, self.timeout);
        if !evicted.is_empty() {
            tracing::info!("Evicted {} stale audio sources", evicted.len());
            self.dispatcher.broadcast_source_list();
        }
        evicted
    }

    /// Sweep every `interval` until the task is aborted
    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                self.sweep();
            }
        })
    }
}

/// Re-send the client list when there is someone to tell about something
pub fn refresh_source_list(dispatcher: &Dispatcher) -> bool {
    let (sources, viewers) = dispatcher.registry().counts();
    if sources == 0 || viewers == 0 {
        return false;
    }
    dispatcher.broadcast_source_list();
    true
}

/// Periodic client list refresh for all viewers
pub fn spawn_list_refresh(dispatcher: Arc<Dispatcher>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        loop {
            ticker.tick().await;
            refresh_source_list(&dispatcher);
        }
    })
}
