//! Subscription index: the fan-out routing table
//!
//! Three maps, each a sharded `DashMap`:
//!
//! ```text
//! topics            Pair       -> { Category -> {conn}, wildcard -> {conn} }
//! connections       ConnId     -> {Topic}            (per-connection cap)
//! account_sessions  AccountId  -> {conn}             (private delivery)
//! ```
//!
//! Topic sets are sharded by pair so high-frequency public events on one
//! pair never contend with another pair. Private delivery reads only
//! `account_sessions` and never touches the topic tables.
//!
//! Lock order: `connections` entry, then `topics` shard. Readers on the
//! fan-out path take a single `topics` shard and release it before sending.

use std::collections::{BTreeSet, HashMap, HashSet};

use dashmap::DashMap;
use tracing::debug;
use types::category::{Category, Topic, TopicFilter};
use types::ids::{AccountId, ConnectionId};
use types::pair::Pair;

use crate::catalog::PairCatalog;
use crate::error::HubError;

#[derive(Debug, Default)]
struct PairSubscribers {
    by_category: HashMap<Category, HashSet<ConnectionId>>,
    wildcard: HashSet<ConnectionId>,
}

impl PairSubscribers {
    fn insert(&mut self, filter: TopicFilter, id: ConnectionId) {
        match filter {
            TopicFilter::Category(category) => {
                self.by_category.entry(category).or_default().insert(id);
            }
            TopicFilter::AllCategories => {
                self.wildcard.insert(id);
            }
        }
    }

    fn remove(&mut self, filter: TopicFilter, id: ConnectionId) {
        match filter {
            TopicFilter::Category(category) => {
                if let Some(set) = self.by_category.get_mut(&category) {
                    set.remove(&id);
                    if set.is_empty() {
                        self.by_category.remove(&category);
                    }
                }
            }
            TopicFilter::AllCategories => {
                self.wildcard.remove(&id);
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.by_category.is_empty() && self.wildcard.is_empty()
    }
}

pub struct SubscriptionIndex {
    topics: DashMap<Pair, PairSubscribers>,
    connections: DashMap<ConnectionId, BTreeSet<Topic>>,
    account_sessions: DashMap<AccountId, HashSet<ConnectionId>>,
    catalog: PairCatalog,
    max_topics: usize,
}

impl SubscriptionIndex {
    pub fn new(catalog: PairCatalog, max_topics: usize) -> Self {
        Self {
            topics: DashMap::new(),
            connections: DashMap::new(),
            account_sessions: DashMap::new(),
            catalog,
            max_topics,
        }
    }

    pub fn catalog(&self) -> &PairCatalog {
        &self.catalog
    }

    /// Start tracking a connection. Subscriptions for untracked ids fail.
    pub fn add_connection(&self, id: ConnectionId) {
        self.connections.entry(id).or_default();
    }

    /// Drop every topic entry of `id`. Returns how many topics were held.
    ///
    /// Account-session membership is removed separately by the registry,
    /// which knows the connection's account.
    pub fn remove_connection(&self, id: ConnectionId) -> usize {
        match self.connections.remove(&id) {
            Some((_, held)) => {
                let count = held.len();
                for topic in held {
                    self.unlink(&topic, id);
                }
                count
            }
            None => 0,
        }
    }

    /// Subscribe `id` to every category of `pair`.
    ///
    /// Returns the concrete topics the wildcard currently covers.
    pub fn subscribe_pair(&self, id: ConnectionId, pair: &Pair) -> Result<Vec<String>, HubError> {
        self.check_pair(pair)?;
        self.insert_topic(id, Topic::wildcard(pair.clone()))?;
        Ok(self
            .catalog
            .categories(pair)
            .into_iter()
            .map(|category| Topic::render(pair, category))
            .collect())
    }

    /// Subscribe `id` to one public category of `pair`.
    pub fn subscribe(&self, id: ConnectionId, pair: &Pair, category: Category) -> Result<(), HubError> {
        self.check_pair(pair)?;
        check_public(category)?;
        self.insert_topic(id, Topic::new(pair.clone(), category))
    }

    /// Remove one specific subscription. Absent subscriptions are a no-op.
    pub fn unsubscribe(&self, id: ConnectionId, pair: &Pair, category: Category) -> Result<(), HubError> {
        self.check_pair(pair)?;
        check_public(category)?;
        self.remove_topics(id, |topic| {
            topic.pair == *pair && topic.filter == TopicFilter::Category(category)
        });
        Ok(())
    }

    /// Remove the wildcard and every specific subscription under `pair`.
    pub fn unsubscribe_pair(&self, id: ConnectionId, pair: &Pair) -> Result<(), HubError> {
        self.check_pair(pair)?;
        self.remove_topics(id, |topic| topic.pair == *pair);
        Ok(())
    }

    pub fn unsubscribe_all(&self, id: ConnectionId) -> usize {
        self.remove_topics(id, |_| true)
    }

    /// Concrete topics held by `id`, wildcards expanded, as `"<pair>:<category>"`.
    ///
    /// Ordered by pair, then category declaration order, without duplicates.
    pub fn list_subscriptions(&self, id: ConnectionId) -> Vec<String> {
        let held: Vec<Topic> = match self.connections.get(&id) {
            Some(topics) => topics.iter().cloned().collect(),
            None => return Vec::new(),
        };

        let mut expanded: BTreeSet<(Pair, Category)> = BTreeSet::new();
        for topic in held {
            match topic.filter {
                TopicFilter::Category(category) => {
                    expanded.insert((topic.pair, category));
                }
                TopicFilter::AllCategories => {
                    for category in self.catalog.categories(&topic.pair) {
                        expanded.insert((topic.pair.clone(), category));
                    }
                }
            }
        }

        expanded
            .iter()
            .map(|(pair, category)| Topic::render(pair, *category))
            .collect()
    }

    /// Number of topics counted against the per-connection cap.
    pub fn subscription_count(&self, id: ConnectionId) -> usize {
        self.connections.get(&id).map(|t| t.len()).unwrap_or(0)
    }

    /// Connections subscribed to `(pair, category)` or to the pair wildcard.
    pub fn recipients(&self, pair: &Pair, category: Category) -> HashSet<ConnectionId> {
        match self.topics.get(pair) {
            Some(subs) => {
                let mut out = subs.wildcard.clone();
                if let Some(specific) = subs.by_category.get(&category) {
                    out.extend(specific.iter().copied());
                }
                out
            }
            None => HashSet::new(),
        }
    }

    /// Connections currently authenticated as `account`.
    pub fn private_recipients(&self, account: &AccountId) -> HashSet<ConnectionId> {
        self.account_sessions
            .get(account)
            .map(|set| set.clone())
            .unwrap_or_default()
    }

    pub fn add_account_session(&self, account: AccountId, id: ConnectionId) {
        self.account_sessions.entry(account).or_default().insert(id);
    }

    pub fn remove_account_session(&self, account: &AccountId, id: ConnectionId) {
        let now_empty = match self.account_sessions.get_mut(account) {
            Some(mut set) => {
                set.remove(&id);
                set.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.account_sessions
                .remove_if(account, |_, set| set.is_empty());
        }
    }

    /// Number of pairs with at least one subscriber.
    pub fn active_pairs(&self) -> usize {
        self.topics.len()
    }

    fn check_pair(&self, pair: &Pair) -> Result<(), HubError> {
        if self.catalog.admits(pair) {
            Ok(())
        } else {
            Err(HubError::InvalidPair(format!("{pair} is not listed")))
        }
    }

    /// Check-and-reserve under the connection's entry lock.
    fn insert_topic(&self, id: ConnectionId, topic: Topic) -> Result<(), HubError> {
        let mut held = self
            .connections
            .get_mut(&id)
            .ok_or(HubError::UnknownConnection(id))?;

        if held.contains(&topic) {
            return Ok(());
        }
        if held.len() >= self.max_topics {
            return Err(HubError::SubscriptionLimitExceeded {
                limit: self.max_topics,
            });
        }

        self.topics
            .entry(topic.pair.clone())
            .or_default()
            .insert(topic.filter, id);
        debug!(conn_id = %id, topic = %topic, "Subscribed");
        held.insert(topic);
        Ok(())
    }

    fn remove_topics<F>(&self, id: ConnectionId, matches: F) -> usize
    where
        F: Fn(&Topic) -> bool,
    {
        let Some(mut held) = self.connections.get_mut(&id) else {
            return 0;
        };

        let removed: Vec<Topic> = held.iter().filter(|t| matches(t)).cloned().collect();
        for topic in &removed {
            held.remove(topic);
            self.unlink(topic, id);
            debug!(conn_id = %id, topic = %topic, "Unsubscribed");
        }
        removed.len()
    }

    fn unlink(&self, topic: &Topic, id: ConnectionId) {
        let now_empty = match self.topics.get_mut(&topic.pair) {
            Some(mut subs) => {
                subs.remove(topic.filter, id);
                subs.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.topics.remove_if(&topic.pair, |_, subs| subs.is_empty());
        }
    }
}

fn check_public(category: Category) -> Result<(), HubError> {
    if category.is_public() {
        Ok(())
    } else {
        Err(HubError::InvalidCategory(format!(
            "{category} is private and delivered automatically after auth_api"
        )))
    }
}
