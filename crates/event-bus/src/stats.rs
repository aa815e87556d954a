//! Bus counters

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters updated by the dispatch engine and the registry.
#[derive(Debug, Default)]
pub(crate) struct BusStats {
    pub events_published: AtomicU64,
    pub deliveries: AtomicU64,
    pub handler_errors: AtomicU64,
    pub contained_errors: AtomicU64,
    pub propagated_errors: AtomicU64,
    pub timeouts: AtomicU64,
    pub subscriptions_expired: AtomicU64,
}

impl BusStats {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self, active_subscriptions: usize) -> BusStatsSnapshot {
        BusStatsSnapshot {
            events_published: self.events_published.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            contained_errors: self.contained_errors.load(Ordering::Relaxed),
            propagated_errors: self.propagated_errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            subscriptions_expired: self.subscriptions_expired.load(Ordering::Relaxed),
            active_subscriptions: active_subscriptions as u64,
        }
    }
}

/// Point-in-time copy of the bus counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStatsSnapshot {
    /// Publish calls that passed argument validation.
    pub events_published: u64,
    /// Handler invocations that settled, successfully or not.
    pub deliveries: u64,
    /// Handler and filter failures.
    pub handler_errors: u64,
    /// Failures swallowed by `ignore_errors` or `isolate_errors`.
    pub contained_errors: u64,
    /// Failures that rejected a publish or went to `system.error`.
    pub propagated_errors: u64,
    /// Wait deadlines that elapsed.
    pub timeouts: u64,
    /// Subscriptions retired by `max_events` or `expires_in`.
    pub subscriptions_expired: u64,
    /// Live subscriptions at snapshot time.
    pub active_subscriptions: u64,
}
