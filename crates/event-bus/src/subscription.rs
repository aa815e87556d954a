//! # Subscription Handle
//!
//! What `subscribe` hands back to the caller. The handle stores no mutable
//! subscription state; every query goes to the registry that owns the entry.

use crate::bus::BusInner;
use crate::registry::SubscriptionId;
use std::fmt;
use std::sync::Weak;
use tracing::debug;

/// A read/unsubscribe capability for one subscription.
///
/// Dropping the handle does not unsubscribe. The handle does not keep the
/// bus alive.
#[derive(Clone)]
pub struct Subscription {
    id: SubscriptionId,
    topic: String,
    is_pattern: bool,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub(crate) fn new(id: SubscriptionId, topic: String, is_pattern: bool, bus: Weak<BusInner>) -> Self {
        Self {
            id,
            topic,
            is_pattern,
            bus,
        }
    }

    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The topic or pattern this subscription was registered with.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[must_use]
    pub fn pattern(&self) -> bool {
        self.is_pattern
    }

    /// Whether the registry still holds this subscription.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.bus
            .upgrade()
            .is_some_and(|bus| bus.registry.read().contains(self.id))
    }

    /// Settled deliveries so far, or `None` once the subscription is gone.
    #[must_use]
    pub fn event_count(&self) -> Option<u64> {
        let bus = self.bus.upgrade()?;
        let entry = bus.registry.read().get(self.id)?;
        Some(entry.event_count())
    }

    /// Remove this subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self) -> bool {
        let Some(bus) = self.bus.upgrade() else {
            debug!(id = %self.id, "Unsubscribe after bus dropped");
            return false;
        };
        bus.unsubscribe(self.id)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("pattern", &self.is_pattern)
            .finish()
    }
}
