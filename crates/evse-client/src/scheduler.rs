//! Polling scheduler.
//!
//! Entities without an active push subscription are queried once per update
//! interval. An entity that was never polled is due immediately, which gives
//! the host a full refresh on the first tick.

use std::time::{Duration, Instant};

use evse_at_protocol::EntityId;

/// Minimum accepted update interval.
pub const MIN_UPDATE_INTERVAL: Duration = Duration::from_secs(10);
/// Maximum accepted update interval.
pub const MAX_UPDATE_INTERVAL: Duration = Duration::from_secs(600);
/// Default update interval.
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);

/// Tracks the next refresh time of every entity.
#[derive(Debug)]
pub struct PollingScheduler {
    interval: Duration,
    next_due: Vec<Option<Instant>>,
}

impl PollingScheduler {
    /// Create a scheduler for `len` entities, all due now.
    pub fn new(len: usize, interval: Duration) -> Self {
        PollingScheduler {
            interval,
            next_due: vec![None; len],
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_due(&self, id: EntityId, now: Instant) -> bool {
        match self.next_due.get(id.0).copied().flatten() {
            Some(at) => now >= at,
            None => true,
        }
    }

    /// Return the due entities among `candidates`, in the order given, and
    /// schedule their next refresh one interval from `now`.
    ///
    /// Callers pass candidates in ascending key order.
    pub fn take_due<I>(&mut self, now: Instant, candidates: I) -> Vec<EntityId>
    where
        I: IntoIterator<Item = EntityId>,
    {
        let mut due = Vec::new();
        for id in candidates {
            if self.is_due(id, now) {
                self.next_due[id.0] = Some(now + self.interval);
                due.push(id);
            }
        }
        due
    }

    /// Make an entity due on the next tick.
    pub fn mark_due(&mut self, id: EntityId) {
        if let Some(slot) = self.next_due.get_mut(id.0) {
            *slot = None;
        }
    }
}
