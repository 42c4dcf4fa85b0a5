//! Domain events consumed by the fan-out
//!
//! Producers tag every event with its pair and category. Private categories
//! also carry the owning account; public ones must not.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use types::category::Category;
use types::ids::AccountId;
use types::pair::Pair;

use crate::error::EventError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub pair: Pair,
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<AccountId>,
    #[serde(default)]
    pub payload: Value,
}

/// Who an event is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Subscribers of the event's topic
    Subscribers,
    /// Authenticated sessions of one account
    Account(AccountId),
}

impl DomainEvent {
    pub fn public(pair: Pair, category: Category, payload: Value) -> Self {
        Self {
            pair,
            category,
            account_id: None,
            payload,
        }
    }

    pub fn private(pair: Pair, category: Category, account_id: AccountId, payload: Value) -> Self {
        Self {
            pair,
            category,
            account_id: Some(account_id),
            payload,
        }
    }

    pub fn audience(&self) -> Result<Audience, EventError> {
        match (self.category.is_public(), self.account_id) {
            (true, None) => Ok(Audience::Subscribers),
            (true, Some(_)) => Err(EventError::UnexpectedAccount(self.category)),
            (false, Some(account)) => Ok(Audience::Account(account)),
            (false, None) => Err(EventError::MissingAccount(self.category)),
        }
    }
}

/// Ingest body: a single event or an array of events.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EventBatch {
    One(DomainEvent),
    Many(Vec<DomainEvent>),
}

impl EventBatch {
    pub fn into_vec(self) -> Vec<DomainEvent> {
        match self {
            EventBatch::One(event) => vec![event],
            EventBatch::Many(events) => events,
        }
    }
}
