//! Counters for the stream gateway
//!
//! Plain atomics updated on the hot path and read as a snapshot by
//! `GET /v1/stats`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct HubMetrics {
    // Connections
    pub connections_opened: AtomicU64,
    pub connections_closed: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub idle_closed: AtomicU64,
    pub stale_closed: AtomicU64,
    pub slow_consumer_closed: AtomicU64,

    // Inbound
    pub messages_received: AtomicU64,
    pub messages_malformed: AtomicU64,
    pub messages_rate_limited: AtomicU64,
    pub errors_replied: AtomicU64,
    pub auth_succeeded: AtomicU64,
    pub auth_failed: AtomicU64,

    // Fan-out
    pub events_received: AtomicU64,
    pub events_rejected: AtomicU64,
    pub frames_delivered: AtomicU64,
    pub frames_dropped: AtomicU64,
}

impl HubMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, live_connections: usize, active_pairs: usize) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            live_connections: live_connections as u64,
            active_pairs: active_pairs as u64,
            connections_opened: load(&self.connections_opened),
            connections_closed: load(&self.connections_closed),
            connections_rejected: load(&self.connections_rejected),
            idle_closed: load(&self.idle_closed),
            stale_closed: load(&self.stale_closed),
            slow_consumer_closed: load(&self.slow_consumer_closed),
            messages_received: load(&self.messages_received),
            messages_malformed: load(&self.messages_malformed),
            messages_rate_limited: load(&self.messages_rate_limited),
            errors_replied: load(&self.errors_replied),
            auth_succeeded: load(&self.auth_succeeded),
            auth_failed: load(&self.auth_failed),
            events_received: load(&self.events_received),
            events_rejected: load(&self.events_rejected),
            frames_delivered: load(&self.frames_delivered),
            frames_dropped: load(&self.frames_dropped),
        }
    }
}

/// Point-in-time view of [`HubMetrics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub live_connections: u64,
    pub active_pairs: u64,
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub connections_rejected: u64,
    pub idle_closed: u64,
    pub stale_closed: u64,
    pub slow_consumer_closed: u64,
    pub messages_received: u64,
    pub messages_malformed: u64,
    pub messages_rate_limited: u64,
    pub errors_replied: u64,
    pub auth_succeeded: u64,
    pub auth_failed: u64,
    pub events_received: u64,
    pub events_rejected: u64,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
}
