//! Event fan-out
//!
//! Events are sharded over a fixed set of workers by pair, so every event of
//! a pair is published by one worker in arrival order. Publishing never waits
//! on a connection: each recipient is offered the frame and slow consumers are
//! handled by the registry's overflow policy.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use types::pair::Pair;

use crate::backpressure::Delivery;
use crate::events::{Audience, DomainEvent};
use crate::index::SubscriptionIndex;
use crate::metrics::HubMetrics;
use crate::protocol::ServerMessage;
use crate::registry::ConnectionRegistry;

/// Outcome of publishing one event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub recipients: usize,
    pub delivered: usize,
    pub dropped: usize,
    pub disconnected: usize,
    pub rejected: bool,
}

pub struct EventFanout {
    registry: Arc<ConnectionRegistry>,
    index: Arc<SubscriptionIndex>,
    metrics: Arc<HubMetrics>,
}

impl EventFanout {
    pub fn new(registry: Arc<ConnectionRegistry>, metrics: Arc<HubMetrics>) -> Self {
        let index = Arc::clone(registry.index());
        Self {
            registry,
            index,
            metrics,
        }
    }

    /// Deliver one event to every matching connection.
    pub fn publish(&self, event: &DomainEvent) -> FanoutReport {
        HubMetrics::incr(&self.metrics.events_received);

        let recipients = match event.audience() {
            Ok(Audience::Subscribers) => self.index.recipients(&event.pair, event.category),
            Ok(Audience::Account(account)) => self.index.private_recipients(&account),
            Err(e) => {
                HubMetrics::incr(&self.metrics.events_rejected);
                warn!(pair = %event.pair, category = %event.category, error = %e, "Dropping misaddressed event");
                return FanoutReport {
                    rejected: true,
                    ..FanoutReport::default()
                };
            }
        };

        let mut report = FanoutReport {
            recipients: recipients.len(),
            ..FanoutReport::default()
        };
        if recipients.is_empty() {
            return report;
        }

        let frame = match ServerMessage::event(event).to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                HubMetrics::incr(&self.metrics.events_rejected);
                warn!(pair = %event.pair, category = %event.category, error = %e, "Failed to encode event");
                report.rejected = true;
                return report;
            }
        };

        for id in recipients {
            match self.registry.deliver(id, frame.clone()) {
                Some(Delivery::Queued) => report.delivered += 1,
                Some(Delivery::Dropped) => report.dropped += 1,
                Some(Delivery::Disconnect) => report.disconnected += 1,
                None => {}
            }
        }

        debug!(
            pair = %event.pair,
            category = %event.category,
            recipients = report.recipients,
            delivered = report.delivered,
            "Event published"
        );
        report
    }

    /// Consume `events` until the source closes.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<DomainEvent>,
        workers: usize,
        worker_capacity: usize,
    ) {
        let workers = workers.max(1);
        let mut shards = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for _ in 0..workers {
            let (tx, mut rx) = mpsc::channel::<DomainEvent>(worker_capacity.max(1));
            let fanout = Arc::clone(&self);
            shards.push(tx);
            handles.push(tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    fanout.publish(&event);
                }
            }));
        }

        info!(workers, "Event fan-out started");

        while let Some(event) = events.recv().await {
            let shard = shard_of(&event.pair, workers);
            if shards[shard].send(event).await.is_err() {
                warn!(shard, "Fan-out worker stopped");
                break;
            }
        }

        drop(shards);
        join_all(handles).await;
        info!("Event source closed, fan-out stopped");
    }
}

fn shard_of(pair: &Pair, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    pair.hash(&mut hasher);
    (hasher.finish() % workers as u64) as usize
}
