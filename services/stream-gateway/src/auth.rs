use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use types::ids::{AccountId, ConnectionId};

use crate::error::{HubError, LimitScope, OracleError};
use crate::metrics::HubMetrics;
use crate::registry::ConnectionRegistry;

/// Resolves API keys to accounts.
///
/// `Ok(None)` means the key is unknown or revoked; `Err` is an internal fault.
#[async_trait]
pub trait AccountOracle: Send + Sync {
    async fn resolve(&self, api_key: &str) -> Result<Option<AccountId>, OracleError>;
}

/// Fixed key map, loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticAccountOracle {
    keys: HashMap<String, AccountId>,
}

impl StaticAccountOracle {
    pub fn new(keys: HashMap<String, AccountId>) -> Self {
        Self { keys }
    }
}

#[async_trait]
impl AccountOracle for StaticAccountOracle {
    async fn resolve(&self, api_key: &str) -> Result<Option<AccountId>, OracleError> {
        Ok(self.keys.get(api_key).copied())
    }
}

#[derive(Debug, Serialize)]
struct ResolveRequest<'a> {
    api_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct ResolveResponse {
    account_id: AccountId,
}

/// Account service client: `POST {base}/internal/api-keys/resolve`.
#[derive(Debug, Clone)]
pub struct HttpAccountOracle {
    client: Client,
    resolve_url: String,
}

impl HttpAccountOracle {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, OracleError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OracleError::Unreachable(e.to_string()))?;
        Ok(Self {
            client,
            resolve_url: format!("{}/internal/api-keys/resolve", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl AccountOracle for HttpAccountOracle {
    async fn resolve(&self, api_key: &str) -> Result<Option<AccountId>, OracleError> {
        let response = self
            .client
            .post(&self.resolve_url)
            .json(&ResolveRequest { api_key })
            .send()
            .await
            .map_err(|e| OracleError::Unreachable(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                let body: ResolveResponse = response
                    .json()
                    .await
                    .map_err(|e| OracleError::InvalidResponse(e.to_string()))?;
                Ok(Some(body.account_id))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(OracleError::UnexpectedStatus(status.as_u16())),
        }
    }
}

/// Binds connections to accounts.
///
/// The per-account connection slot is reserved before the binding and
/// released on every failure path, so a failed `auth_api` leaves the
/// connection's previous authentication untouched.
pub struct AuthGate {
    oracle: Arc<dyn AccountOracle>,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<HubMetrics>,
}

impl AuthGate {
    pub fn new(
        oracle: Arc<dyn AccountOracle>,
        registry: Arc<ConnectionRegistry>,
        metrics: Arc<HubMetrics>,
    ) -> Self {
        Self {
            oracle,
            registry,
            metrics,
        }
    }

    pub async fn authenticate(&self, id: ConnectionId, api_key: &str) -> Result<AccountId, HubError> {
        let result = self.try_authenticate(id, api_key).await;
        match &result {
            Ok(_) => HubMetrics::incr(&self.metrics.auth_succeeded),
            Err(_) => HubMetrics::incr(&self.metrics.auth_failed),
        }
        result
    }

    async fn try_authenticate(&self, id: ConnectionId, api_key: &str) -> Result<AccountId, HubError> {
        if api_key.trim().is_empty() {
            return Err(HubError::InvalidApiKey);
        }

        let account = match self.oracle.resolve(api_key).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                warn!(conn_id = %id, "Rejected unknown api key");
                return Err(HubError::InvalidApiKey);
            }
            Err(e) => {
                error!(conn_id = %id, error = %e, "Account oracle failed");
                return Err(HubError::ServiceUnavailable(
                    "authentication is temporarily unavailable".to_string(),
                ));
            }
        };

        if self.registry.account_of(id) == Some(account) {
            return Ok(account);
        }

        if !self.registry.reserve_account_slot(account) {
            let limit = self.registry.max_per_account();
            warn!(conn_id = %id, account_id = %account, limit, "Auth rejected: per-account limit");
            return Err(HubError::ConnectionLimitExceeded {
                scope: LimitScope::Account,
                limit,
            });
        }

        match self.registry.bind_account(id, account) {
            Ok(Some(previous)) if previous == account => {
                self.registry.release_account_slot(account);
            }
            Ok(Some(previous)) => {
                self.registry.release_account_slot(previous);
                info!(conn_id = %id, account_id = %account, previous = %previous, "Connection re-authenticated");
            }
            Ok(None) => {
                info!(conn_id = %id, account_id = %account, "Connection authenticated");
            }
            Err(e) => {
                self.registry.release_account_slot(account);
                return Err(e);
            }
        }

        Ok(account)
    }
}
