//! Connection registry
//!
//! Owns every live session: its outbound queue, close signal, account binding
//! and activity timestamps. Deregistration is the single teardown path and
//! releases index entries and connection slots synchronously.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{info, warn};
use types::ids::{AccountId, ConnectionId};

use crate::backpressure::{offer, Delivery, Frame, OverflowPolicy};
use crate::error::{HubError, LimitScope};
use crate::index::SubscriptionIndex;
use crate::metrics::HubMetrics;
use crate::rate_limit::{ConnectionSlots, Identity};

/// Why a session was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ClientClosed,
    IdleTimeout,
    Stale,
    SlowConsumer,
    TransportClosed,
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::ClientClosed => "client_closed",
            CloseReason::IdleTimeout => "idle_timeout",
            CloseReason::Stale => "stale",
            CloseReason::SlowConsumer => "slow_consumer",
            CloseReason::TransportClosed => "transport_closed",
            CloseReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RegistryLimits {
    pub max_per_ip: usize,
    pub max_per_account: usize,
    pub outbound_capacity: usize,
    pub overflow: OverflowPolicy,
}

struct Session {
    remote_ip: IpAddr,
    outbound: mpsc::Sender<Frame>,
    close_tx: Option<oneshot::Sender<CloseReason>>,
    account: Option<AccountId>,
    created_at: Instant,
    last_activity: Instant,
    /// Set while the session has no subscriptions and no account
    inactive_since: Option<Instant>,
}

/// Transport-side ends of a registered session.
pub struct SessionHandle {
    pub id: ConnectionId,
    /// Frames to write to the socket, in order
    pub outbound: mpsc::Receiver<Frame>,
    /// Fires once when the hub closes the session
    pub closed: oneshot::Receiver<CloseReason>,
}

pub struct ConnectionRegistry {
    sessions: DashMap<ConnectionId, Session>,
    index: Arc<SubscriptionIndex>,
    slots: ConnectionSlots,
    limits: RegistryLimits,
    metrics: Arc<HubMetrics>,
}

impl ConnectionRegistry {
    pub fn new(index: Arc<SubscriptionIndex>, limits: RegistryLimits, metrics: Arc<HubMetrics>) -> Self {
        Self {
            sessions: DashMap::new(),
            index,
            slots: ConnectionSlots::new(),
            limits,
            metrics,
        }
    }

    pub fn index(&self) -> &Arc<SubscriptionIndex> {
        &self.index
    }

    /// Admit a new connection from `remote_ip`.
    pub fn register(&self, remote_ip: IpAddr) -> Result<SessionHandle, HubError> {
        if !self.slots.try_acquire(Identity::Ip(remote_ip), self.limits.max_per_ip) {
            HubMetrics::incr(&self.metrics.connections_rejected);
            warn!(remote_ip = %remote_ip, limit = self.limits.max_per_ip, "Connection rejected: per-IP limit");
            return Err(HubError::ConnectionLimitExceeded {
                scope: LimitScope::Ip,
                limit: self.limits.max_per_ip,
            });
        }

        let id = ConnectionId::next();
        let (outbound_tx, outbound_rx) = mpsc::channel(self.limits.outbound_capacity);
        let (close_tx, close_rx) = oneshot::channel();
        let now = Instant::now();

        self.index.add_connection(id);
        self.sessions.insert(
            id,
            Session {
                remote_ip,
                outbound: outbound_tx,
                close_tx: Some(close_tx),
                account: None,
                created_at: now,
                last_activity: now,
                inactive_since: Some(now),
            },
        );

        HubMetrics::incr(&self.metrics.connections_opened);
        info!(conn_id = %id, remote_ip = %remote_ip, "Connection registered");

        Ok(SessionHandle {
            id,
            outbound: outbound_rx,
            closed: close_rx,
        })
    }

    /// Tear a session down. Returns `false` if it was already gone.
    pub fn deregister(&self, id: ConnectionId, reason: CloseReason) -> bool {
        let Some((_, mut session)) = self.sessions.remove(&id) else {
            return false;
        };

        if let Some(account) = session.account {
            self.index.remove_account_session(&account, id);
            self.slots.release(Identity::Account(account));
        }
        let topics = self.index.remove_connection(id);
        self.slots.release(Identity::Ip(session.remote_ip));

        if let Some(close_tx) = session.close_tx.take() {
            let _ = close_tx.send(reason);
        }

        HubMetrics::incr(&self.metrics.connections_closed);
        match reason {
            CloseReason::IdleTimeout => HubMetrics::incr(&self.metrics.idle_closed),
            CloseReason::Stale => HubMetrics::incr(&self.metrics.stale_closed),
            CloseReason::SlowConsumer => HubMetrics::incr(&self.metrics.slow_consumer_closed),
            _ => {}
        }

        info!(
            conn_id = %id,
            remote_ip = %session.remote_ip,
            reason = %reason,
            topics,
            lifetime_ms = session.created_at.elapsed().as_millis() as u64,
            "Connection deregistered"
        );
        true
    }

    /// Record a successfully processed inbound message.
    pub fn touch(&self, id: ConnectionId) {
        if let Some(mut session) = self.sessions.get_mut(&id) {
            session.last_activity = Instant::now();
        }
    }

    /// A session is active while it holds a subscription or an account.
    pub fn is_active(&self, id: ConnectionId) -> bool {
        match self.sessions.get(&id) {
            Some(session) => session.account.is_some() || self.index.subscription_count(id) > 0,
            None => false,
        }
    }

    /// Re-evaluate activity after a mutation; re-arms the idle grace on an
    /// active to inactive transition.
    pub fn refresh_activity(&self, id: ConnectionId) {
        if let Some(mut session) = self.sessions.get_mut(&id) {
            let active = session.account.is_some() || self.index.subscription_count(id) > 0;
            if active {
                session.inactive_since = None;
            } else if session.inactive_since.is_none() {
                session.inactive_since = Some(Instant::now());
            }
        }
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Rate-limit identity: the account once authenticated, else the IP.
    pub fn identity(&self, id: ConnectionId) -> Option<Identity> {
        self.sessions.get(&id).map(|session| match session.account {
            Some(account) => Identity::Account(account),
            None => Identity::Ip(session.remote_ip),
        })
    }

    pub fn account_of(&self, id: ConnectionId) -> Option<AccountId> {
        self.sessions.get(&id).and_then(|session| session.account)
    }

    pub fn reserve_account_slot(&self, account: AccountId) -> bool {
        self.slots
            .try_acquire(Identity::Account(account), self.limits.max_per_account)
    }

    pub fn release_account_slot(&self, account: AccountId) {
        self.slots.release(Identity::Account(account));
    }

    /// Connections currently holding a slot for `ip`.
    pub fn ip_connections(&self, ip: IpAddr) -> usize {
        self.slots.in_flight(&Identity::Ip(ip))
    }

    pub fn account_connections(&self, account: AccountId) -> usize {
        self.slots.in_flight(&Identity::Account(account))
    }

    pub fn max_per_account(&self) -> usize {
        self.limits.max_per_account
    }

    /// Bind `id` to `account` and move it between account session sets.
    ///
    /// Returns the previous account. Slot accounting is left to the caller.
    pub fn bind_account(&self, id: ConnectionId, account: AccountId) -> Result<Option<AccountId>, HubError> {
        let mut session = self
            .sessions
            .get_mut(&id)
            .ok_or(HubError::UnknownConnection(id))?;

        let previous = session.account.replace(account);
        if previous != Some(account) {
            if let Some(prev) = previous {
                self.index.remove_account_session(&prev, id);
            }
            self.index.add_account_session(account, id);
        }
        session.inactive_since = None;
        Ok(previous)
    }

    /// Offer a frame to the session's outbound queue.
    ///
    /// Returns `None` for unknown sessions. A `Disconnect` outcome has
    /// already deregistered the session.
    pub fn deliver(&self, id: ConnectionId, frame: Frame) -> Option<Delivery> {
        let sender = self.sessions.get(&id).map(|s| s.outbound.clone())?;

        let outcome = offer(&sender, frame, self.limits.overflow);
        match outcome {
            Delivery::Queued => HubMetrics::incr(&self.metrics.frames_delivered),
            Delivery::Dropped => HubMetrics::incr(&self.metrics.frames_dropped),
            Delivery::Disconnect => {
                HubMetrics::incr(&self.metrics.frames_dropped);
                let reason = if sender.is_closed() {
                    CloseReason::TransportClosed
                } else {
                    warn!(conn_id = %id, capacity = self.limits.outbound_capacity, "Outbound queue full, disconnecting slow consumer");
                    CloseReason::SlowConsumer
                };
                self.deregister(id, reason);
            }
        }
        Some(outcome)
    }

    /// Sessions due for closing at `now`.
    pub fn reap_candidates(
        &self,
        now: Instant,
        idle_grace: Duration,
        stale_timeout: Option<Duration>,
    ) -> Vec<(ConnectionId, CloseReason)> {
        self.sessions
            .iter()
            .filter_map(|entry| {
                let session = entry.value();
                let idle = session
                    .inactive_since
                    .is_some_and(|since| now.saturating_duration_since(since) >= idle_grace);
                let stale = stale_timeout.is_some_and(|timeout| {
                    now.saturating_duration_since(session.last_activity) >= timeout
                });

                if idle {
                    Some((*entry.key(), CloseReason::IdleTimeout))
                } else if stale {
                    Some((*entry.key(), CloseReason::Stale))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Close every session. Returns how many were closed.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        let ids: Vec<ConnectionId> = self.sessions.iter().map(|e| *e.key()).collect();
        ids.into_iter()
            .filter(|id| self.deregister(*id, reason))
            .count()
    }
}
