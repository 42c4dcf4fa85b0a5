//! Gateway configuration.
//!
//! Loaded from an optional JSON file named by `STREAM_GATEWAY_CONFIG`, then
//! patched by individual environment overrides. Every field has a default so
//! an empty object is a valid configuration.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use types::category::Category;
use types::ids::AccountId;
use types::pair::Pair;

use crate::backpressure::OverflowPolicy;
use crate::error::ConfigError;

pub const CONFIG_PATH_ENV: &str = "STREAM_GATEWAY_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Socket address the HTTP/WebSocket listener binds to
    pub bind_addr: String,
    /// Socket address of the event-ingest listener; keep it off public interfaces
    pub internal_bind_addr: String,
    /// Shared secret required in `x-internal-token` on ingest requests, when set
    pub internal_token: Option<String>,
    pub max_subscriptions_per_connection: usize,
    pub max_connections_per_ip: usize,
    pub max_connections_per_account: usize,
    /// Admitted inbound messages per identity per window
    pub rate_limit_max_messages: u32,
    pub rate_limit_window_ms: u64,
    /// Grace before an inactive connection is closed
    pub idle_grace_secs: u64,
    pub reap_interval_ms: u64,
    /// Close connections silent for this long, regardless of activity
    pub stale_timeout_secs: Option<u64>,
    pub outbound_queue_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    pub fanout_workers: usize,
    pub fanout_queue_capacity: usize,
    /// Base URL of the account service; static keys are used when unset
    pub account_service_url: Option<String>,
    pub oracle_timeout_ms: u64,
    pub api_keys: HashMap<String, AccountId>,
    /// Public categories carried by each listed pair
    pub pairs: HashMap<Pair, Vec<Category>>,
    /// Reject pairs missing from `pairs`
    pub restrict_pairs: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            internal_bind_addr: "127.0.0.1:8081".to_string(),
            internal_token: None,
            max_subscriptions_per_connection: 10,
            max_connections_per_ip: 10,
            max_connections_per_account: 10,
            rate_limit_max_messages: 20,
            rate_limit_window_ms: 1_000,
            idle_grace_secs: 30,
            reap_interval_ms: 1_000,
            stale_timeout_secs: None,
            outbound_queue_capacity: 1_024,
            overflow_policy: OverflowPolicy::Disconnect,
            fanout_workers: 4,
            fanout_queue_capacity: 65_536,
            account_service_url: None,
            oracle_timeout_ms: 2_000,
            api_keys: HashMap::new(),
            pairs: HashMap::new(),
            restrict_pairs: false,
        }
    }
}

impl HubConfig {
    /// Load from the file named by `STREAM_GATEWAY_CONFIG` (if set) and
    /// apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Applies environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides resolved through `lookup`, keyed by variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("STREAM_GATEWAY_BIND") {
            self.bind_addr = val;
        }
        if let Some(val) = lookup("STREAM_GATEWAY_INTERNAL_BIND") {
            self.internal_bind_addr = val;
        }
        if let Some(val) = lookup("STREAM_GATEWAY_INTERNAL_TOKEN") {
            if !val.is_empty() {
                self.internal_token = Some(val);
            }
        }
        if let Some(val) = lookup("STREAM_GATEWAY_ACCOUNT_SERVICE_URL") {
            if !val.is_empty() {
                self.account_service_url = Some(val);
            }
        }
        if let Some(val) = lookup("STREAM_GATEWAY_IDLE_GRACE_SECS") {
            self.idle_grace_secs = val.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!(
                    "STREAM_GATEWAY_IDLE_GRACE_SECS must be a whole number of seconds, got {val:?}"
                ))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("max_subscriptions_per_connection", self.max_subscriptions_per_connection as u64),
            ("max_connections_per_ip", self.max_connections_per_ip as u64),
            ("max_connections_per_account", self.max_connections_per_account as u64),
            ("rate_limit_max_messages", u64::from(self.rate_limit_max_messages)),
            ("rate_limit_window_ms", self.rate_limit_window_ms),
            ("reap_interval_ms", self.reap_interval_ms),
            ("outbound_queue_capacity", self.outbound_queue_capacity as u64),
            ("fanout_workers", self.fanout_workers as u64),
            ("fanout_queue_capacity", self.fanout_queue_capacity as u64),
            ("oracle_timeout_ms", self.oracle_timeout_ms),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
        }

        if self.bind_addr == self.internal_bind_addr {
            return Err(ConfigError::Invalid(
                "internal_bind_addr must differ from bind_addr".to_string(),
            ));
        }

        for (pair, categories) in &self.pairs {
            if let Some(private) = categories.iter().find(|c| !c.is_public()) {
                return Err(ConfigError::Invalid(format!(
                    "pair {pair} lists private category {private}"
                )));
            }
        }

        Ok(())
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    pub fn idle_grace(&self) -> Duration {
        Duration::from_secs(self.idle_grace_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }

    pub fn stale_timeout(&self) -> Option<Duration> {
        self.stale_timeout_secs.map(Duration::from_secs)
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_millis(self.oracle_timeout_ms)
    }
}
