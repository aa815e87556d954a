//! # Subscription Registry
//!
//! Sole owner of subscription records. Entries are kept in registration
//! order so that the stable priority sort in [`SubscriptionRegistry::matching`]
//! breaks ties by registration.
//!
//! ## Liveness
//!
//! A subscription is live while neither its deadline has passed nor its
//! delivery count has reached `max_events`. The same predicate,
//! [`SubscriptionEntry::is_live`], drives lazy expiry during matching and
//! the periodic sweep.

use crate::config::BusConfig;
use crate::error::{BusError, CapacityScope, HandlerError};
use crate::events::Event;
use crate::handler::{same_handler, EventFilter, HandlerRef};
use crate::pattern::TopicPattern;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Opaque subscription identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Per-subscription delivery options.
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    /// Higher values dispatch first.
    pub priority: i32,
    /// Evaluated before the handler; `false` or an error skips delivery.
    pub filter: Option<EventFilter>,
    /// Contain this subscription's failures instead of propagating them.
    pub isolate_errors: bool,
    /// Lifetime measured from subscription time.
    pub expires_in: Option<Duration>,
    /// Number of deliveries after which the subscription retires.
    pub max_events: Option<u64>,
}

impl SubscribeOptions {
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Event) -> Result<bool, HandlerError> + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn isolated(mut self) -> Self {
        self.isolate_errors = true;
        self
    }

    pub fn expires_in(mut self, lifetime: Duration) -> Self {
        self.expires_in = Some(lifetime);
        self
    }

    pub fn max_events(mut self, max: u64) -> Self {
        self.max_events = Some(max);
        self
    }
}

impl fmt::Debug for SubscribeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("priority", &self.priority)
            .field("filter", &self.filter.is_some())
            .field("isolate_errors", &self.isolate_errors)
            .field("expires_in", &self.expires_in)
            .field("max_events", &self.max_events)
            .finish()
    }
}

/// A live registration, owned by the registry.
pub struct SubscriptionEntry {
    pub id: SubscriptionId,
    pub topic: String,
    /// Compiled matcher, present for pattern subscriptions only
    pattern: Option<TopicPattern>,
    pub handler: HandlerRef,
    pub priority: i32,
    pub filter: Option<EventFilter>,
    pub isolate_errors: bool,
    expires_at: Option<Instant>,
    max_events: Option<u64>,
    /// Settled deliveries
    event_count: AtomicU64,
    /// Deliveries handed out, settled or in flight
    reserved: AtomicU64,
    pub created_at: Instant,
}

impl SubscriptionEntry {
    fn new(topic: &str, is_pattern: bool, handler: HandlerRef, options: SubscribeOptions) -> Self {
        let now = Instant::now();
        Self {
            id: SubscriptionId::new(),
            topic: topic.to_string(),
            pattern: is_pattern.then(|| TopicPattern::new(topic)),
            handler,
            priority: options.priority,
            filter: options.filter,
            isolate_errors: options.isolate_errors,
            expires_at: options.expires_in.map(|lifetime| now + lifetime),
            max_events: options.max_events,
            event_count: AtomicU64::new(0),
            reserved: AtomicU64::new(0),
            created_at: now,
        }
    }

    #[must_use]
    pub fn is_pattern(&self) -> bool {
        self.pattern.is_some()
    }

    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.event_count.load(Ordering::Acquire)
    }

    /// Live iff neither the deadline nor the delivery cap has been reached.
    #[must_use]
    pub fn is_live(&self, now: Instant) -> bool {
        let in_time = self.expires_at.map_or(true, |deadline| now < deadline);
        let under_cap = self.max_events.map_or(true, |max| self.event_count() < max);
        in_time && under_cap
    }

    fn accepts(&self, topic: &str) -> bool {
        match &self.pattern {
            Some(pattern) => pattern.matches(topic),
            None => self.topic == topic,
        }
    }

    /// Claim one delivery slot. Fails once `max_events` slots are out, which
    /// keeps concurrent publishes from overshooting the cap.
    pub(crate) fn try_reserve(&self) -> bool {
        let Some(max) = self.max_events else {
            self.reserved.fetch_add(1, Ordering::AcqRel);
            return true;
        };
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |taken| {
                (taken < max).then_some(taken + 1)
            })
            .is_ok()
    }

    /// Count a settled delivery; returns the new count.
    pub(crate) fn record_delivery(&self) -> u64 {
        self.event_count.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl fmt::Debug for SubscriptionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionEntry")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("is_pattern", &self.is_pattern())
            .field("priority", &self.priority)
            .field("isolate_errors", &self.isolate_errors)
            .field("max_events", &self.max_events)
            .field("event_count", &self.event_count())
            .finish_non_exhaustive()
    }
}

/// Indexed store of live subscriptions with capacity accounting.
pub struct SubscriptionRegistry {
    config: BusConfig,
    /// Registration order
    subscriptions: Vec<Arc<SubscriptionEntry>>,
    /// Exact-topic subscription count by topic
    topic_counts: HashMap<String, usize>,
}

impl SubscriptionRegistry {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            subscriptions: Vec::new(),
            topic_counts: HashMap::new(),
        }
    }

    /// Register a subscription after argument and capacity checks.
    ///
    /// # Errors
    ///
    /// - `BusError::InvalidArgument` - empty topic
    /// - `BusError::CapacityExceeded` - global or per-topic cap reached
    pub fn insert(
        &mut self,
        topic: &str,
        is_pattern: bool,
        handler: HandlerRef,
        options: SubscribeOptions,
    ) -> Result<Arc<SubscriptionEntry>, BusError> {
        if topic.is_empty() {
            let what = if is_pattern { "pattern" } else { "topic" };
            return Err(BusError::InvalidArgument(format!("{what} must not be empty")));
        }

        // Expired-but-unswept entries must not hold capacity
        if self.at_capacity(topic, is_pattern) {
            self.sweep(Instant::now());
        }

        if self.subscriptions.len() >= self.config.max_subscriptions {
            return Err(BusError::CapacityExceeded {
                scope: CapacityScope::Global,
                current: self.subscriptions.len(),
                max: self.config.max_subscriptions,
            });
        }

        if !is_pattern {
            let current = self.topic_count(topic);
            if current >= self.config.max_subscriptions_per_topic {
                return Err(BusError::CapacityExceeded {
                    scope: CapacityScope::Topic(topic.to_string()),
                    current,
                    max: self.config.max_subscriptions_per_topic,
                });
            }
            *self.topic_counts.entry(topic.to_string()).or_insert(0) += 1;
        }

        let entry = Arc::new(SubscriptionEntry::new(topic, is_pattern, handler, options));
        self.subscriptions.push(entry.clone());

        debug!(
            id = %entry.id,
            topic = %entry.topic,
            pattern = is_pattern,
            priority = entry.priority,
            "Subscription created"
        );

        Ok(entry)
    }

    fn at_capacity(&self, topic: &str, is_pattern: bool) -> bool {
        self.subscriptions.len() >= self.config.max_subscriptions
            || (!is_pattern && self.topic_count(topic) >= self.config.max_subscriptions_per_topic)
    }

    /// Remove by identifier.
    pub fn remove(&mut self, id: SubscriptionId) -> Option<Arc<SubscriptionEntry>> {
        let index = self.subscriptions.iter().position(|entry| entry.id == id)?;
        let entry = self.subscriptions.remove(index);
        self.release_topic(&entry);
        Some(entry)
    }

    /// Remove every exact subscription on `topic` bound to `handler`.
    pub fn remove_handler(&mut self, topic: &str, handler: &HandlerRef) -> usize {
        let mut removed = Vec::new();
        self.subscriptions.retain(|entry| {
            let hit = !entry.is_pattern() && entry.topic == topic && same_handler(&entry.handler, handler);
            if hit {
                removed.push(entry.clone());
            }
            !hit
        });
        for entry in &removed {
            self.release_topic(entry);
        }
        removed.len()
    }

    fn release_topic(&mut self, entry: &SubscriptionEntry) {
        if entry.is_pattern() {
            return;
        }
        let Some(count) = self.topic_counts.get_mut(&entry.topic) else {
            return;
        };
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.topic_counts.remove(&entry.topic);
        }
    }

    /// Live subscriptions accepting `topic`, highest priority first.
    ///
    /// Non-live entries met during the scan are retired; the second element
    /// is how many. The returned vector is a snapshot: later registry changes
    /// do not affect it.
    pub fn matching(
        &mut self,
        topic: &str,
        min_priority: Option<i32>,
        now: Instant,
    ) -> (Vec<Arc<SubscriptionEntry>>, usize) {
        let retired = self.sweep(now);

        let mut matched: Vec<_> = self
            .subscriptions
            .iter()
            .filter(|entry| entry.accepts(topic))
            .filter(|entry| min_priority.map_or(true, |floor| entry.priority >= floor))
            .cloned()
            .collect();

        // Stable: equal priorities keep registration order
        matched.sort_by_key(|entry| Reverse(entry.priority));

        (matched, retired)
    }

    /// Number of live subscriptions accepting `topic`.
    #[must_use]
    pub fn count_matching(&self, topic: &str, now: Instant) -> usize {
        self.subscriptions
            .iter()
            .filter(|entry| entry.is_live(now) && entry.accepts(topic))
            .count()
    }

    /// Live subscriptions, exact and pattern.
    #[must_use]
    pub fn live_count(&self, now: Instant) -> usize {
        self.subscriptions
            .iter()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    /// Literal topics with at least one live subscriber, in first-registration order.
    #[must_use]
    pub fn active_topics(&self, now: Instant) -> Vec<String> {
        let mut topics: Vec<String> = Vec::new();
        for entry in &self.subscriptions {
            if entry.is_pattern() || !entry.is_live(now) || topics.contains(&entry.topic) {
                continue;
            }
            topics.push(entry.topic.clone());
        }
        topics
    }

    /// Evict every non-live subscription; returns how many were evicted.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let mut expired = Vec::new();
        self.subscriptions.retain(|entry| {
            let live = entry.is_live(now);
            if !live {
                expired.push(entry.clone());
            }
            live
        });
        for entry in &expired {
            self.release_topic(entry);
            debug!(id = %entry.id, topic = %entry.topic, "Subscription expired");
        }
        expired.len()
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.subscriptions.iter().any(|entry| entry.id == id)
    }

    pub fn get(&self, id: SubscriptionId) -> Option<Arc<SubscriptionEntry>> {
        self.subscriptions.iter().find(|entry| entry.id == id).cloned()
    }

    /// Exact subscriptions currently counted against `topic`'s cap.
    #[must_use]
    pub fn topic_count(&self, topic: &str) -> usize {
        self.topic_counts.get(topic).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn clear(&mut self) -> usize {
        let dropped = self.subscriptions.len();
        self.subscriptions.clear();
        self.topic_counts.clear();
        dropped
    }
}
