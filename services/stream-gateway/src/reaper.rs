use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::rate_limit::RateLimiter;
use crate::registry::{CloseReason, ConnectionRegistry};

/// Result of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub idle: usize,
    pub stale: usize,
    pub limiter_windows: usize,
}

/// Periodically closes idle and stale sessions.
pub struct IdleReaper {
    registry: Arc<ConnectionRegistry>,
    limiter: Arc<RateLimiter>,
    interval: Duration,
    idle_grace: Duration,
    stale_timeout: Option<Duration>,
}

impl IdleReaper {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        limiter: Arc<RateLimiter>,
        interval: Duration,
        idle_grace: Duration,
        stale_timeout: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            limiter,
            interval,
            idle_grace,
            stale_timeout,
        }
    }

    pub fn sweep(&self, now: Instant) -> ReapReport {
        let mut report = ReapReport::default();

        for (id, reason) in self
            .registry
            .reap_candidates(now, self.idle_grace, self.stale_timeout)
        {
            // Skip sessions that became active since the scan
            if reason == CloseReason::IdleTimeout && self.registry.is_active(id) {
                continue;
            }
            if self.registry.deregister(id, reason) {
                match reason {
                    CloseReason::Stale => report.stale += 1,
                    _ => report.idle += 1,
                }
            }
        }
        report.limiter_windows = self.limiter.sweep(now);

        if report.idle > 0 || report.stale > 0 {
            info!(idle = report.idle, stale = report.stale, "Reaped sessions");
        }
        report
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(interval_ms = self.interval.as_millis() as u64, "Idle reaper started");

        loop {
            ticker.tick().await;
            self.sweep(Instant::now());
        }
    }
}
