use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use types::ids::AccountId;

/// Who a limit is charged to: the account once authenticated, else the IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Identity {
    Account(AccountId),
    Ip(IpAddr),
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Account(account) => write!(f, "account:{}", account),
            Identity::Ip(ip) => write!(f, "ip:{}", ip),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    admitted: u32,
}

/// Fixed-window message limiter.
///
/// The window resets every `window`; at most `max_messages` calls are
/// admitted per identity per window. Rejected calls consume nothing.
pub struct RateLimiter {
    windows: DashMap<Identity, Window>,
    max_messages: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_messages: u32, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            max_messages,
            window,
        }
    }

    pub fn allow(&self, identity: &Identity) -> bool {
        self.allow_at(identity, Instant::now())
    }

    pub fn allow_at(&self, identity: &Identity, now: Instant) -> bool {
        let mut window = self.windows.entry(*identity).or_insert(Window {
            started: now,
            admitted: 0,
        });

        if now.saturating_duration_since(window.started) >= self.window {
            window.started = now;
            window.admitted = 0;
        }

        if window.admitted < self.max_messages {
            window.admitted += 1;
            true
        } else {
            false
        }
    }

    /// Forget identities whose window has expired. Returns how many were dropped.
    pub fn sweep(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.started) < self.window);
        before.saturating_sub(self.windows.len())
    }

    pub fn tracked_identities(&self) -> usize {
        self.windows.len()
    }
}

/// In-flight connection counters per identity.
///
/// `try_acquire` checks and reserves under the same shard lock, so two
/// concurrent callers can never both pass the limit.
#[derive(Default)]
pub struct ConnectionSlots {
    in_flight: DashMap<Identity, usize>,
}

impl ConnectionSlots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, identity: Identity, limit: usize) -> bool {
        let mut count = self.in_flight.entry(identity).or_insert(0);
        if *count >= limit {
            return false;
        }
        *count += 1;
        true
    }

    pub fn release(&self, identity: Identity) {
        let now_zero = match self.in_flight.get_mut(&identity) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => false,
        };
        if now_zero {
            self.in_flight.remove_if(&identity, |_, count| *count == 0);
        }
    }

    pub fn in_flight(&self, identity: &Identity) -> usize {
        self.in_flight.get(identity).map(|c| *c).unwrap_or(0)
    }
}
