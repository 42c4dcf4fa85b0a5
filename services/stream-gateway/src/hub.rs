//! Wiring of the subscription hub
//!
//! `Hub` is cheap to clone and shared by every connection task, the fan-out
//! workers and the reaper.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::auth::{AccountOracle, AuthGate, HttpAccountOracle, StaticAccountOracle};
use crate::catalog::PairCatalog;
use crate::config::HubConfig;
use crate::dispatch::MessageRouter;
use crate::error::{ConfigError, OracleError};
use crate::events::DomainEvent;
use crate::fanout::EventFanout;
use crate::index::SubscriptionIndex;
use crate::metrics::{HubMetrics, MetricsSnapshot};
use crate::rate_limit::RateLimiter;
use crate::reaper::IdleReaper;
use crate::registry::{CloseReason, ConnectionRegistry, RegistryLimits};

#[derive(Clone)]
pub struct Hub {
    pub config: Arc<HubConfig>,
    pub metrics: Arc<HubMetrics>,
    pub index: Arc<SubscriptionIndex>,
    pub registry: Arc<ConnectionRegistry>,
    pub limiter: Arc<RateLimiter>,
    pub auth: Arc<AuthGate>,
    pub router: Arc<MessageRouter>,
    pub fanout: Arc<EventFanout>,
}

impl Hub {
    pub fn new(config: &HubConfig, oracle: Arc<dyn AccountOracle>) -> Result<Self, ConfigError> {
        config.validate()?;

        let metrics = Arc::new(HubMetrics::new());
        let catalog = PairCatalog::new(config.pairs.clone(), config.restrict_pairs);
        let index = Arc::new(SubscriptionIndex::new(
            catalog,
            config.max_subscriptions_per_connection,
        ));
        let registry = Arc::new(ConnectionRegistry::new(
            Arc::clone(&index),
            RegistryLimits {
                max_per_ip: config.max_connections_per_ip,
                max_per_account: config.max_connections_per_account,
                outbound_capacity: config.outbound_queue_capacity,
                overflow: config.overflow_policy,
            },
            Arc::clone(&metrics),
        ));
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit_max_messages,
            config.rate_limit_window(),
        ));
        let auth = Arc::new(AuthGate::new(
            oracle,
            Arc::clone(&registry),
            Arc::clone(&metrics),
        ));
        let router = Arc::new(MessageRouter::new(
            Arc::clone(&registry),
            Arc::clone(&limiter),
            Arc::clone(&auth),
            Arc::clone(&metrics),
        ));
        let fanout = Arc::new(EventFanout::new(Arc::clone(&registry), Arc::clone(&metrics)));

        Ok(Self {
            config: Arc::new(config.clone()),
            metrics,
            index,
            registry,
            limiter,
            auth,
            router,
            fanout,
        })
    }

    /// Account service client when a URL is configured, else the static key map.
    pub fn oracle_from_config(config: &HubConfig) -> Result<Arc<dyn AccountOracle>, OracleError> {
        match &config.account_service_url {
            Some(url) => {
                info!(url = %url, "Resolving api keys via account service");
                Ok(Arc::new(HttpAccountOracle::new(url, config.oracle_timeout())?))
            }
            None => {
                info!(keys = config.api_keys.len(), "Resolving api keys from static configuration");
                Ok(Arc::new(StaticAccountOracle::new(config.api_keys.clone())))
            }
        }
    }

    /// Start the fan-out workers and the idle reaper.
    pub fn spawn(&self, events: mpsc::Receiver<DomainEvent>) -> Vec<JoinHandle<()>> {
        let reaper = IdleReaper::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.limiter),
            self.config.reap_interval(),
            self.config.idle_grace(),
            self.config.stale_timeout(),
        );
        let workers = self.config.fanout_workers;
        let worker_capacity = self.config.fanout_queue_capacity / workers.max(1);

        vec![
            tokio::spawn(Arc::clone(&self.fanout).run(events, workers, worker_capacity)),
            tokio::spawn(reaper.run()),
        ]
    }

    pub fn stats(&self) -> MetricsSnapshot {
        self.metrics
            .snapshot(self.registry.len(), self.index.active_pairs())
    }

    /// Close every live session.
    pub fn shutdown(&self) -> usize {
        let closed = self.registry.close_all(CloseReason::Shutdown);
        info!(closed, "Hub shut down");
        closed
    }
}
