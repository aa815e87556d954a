//! # Event Bus
//!
//! Owner object for one registry, its sweep timer and its counters. Several
//! buses can coexist; nothing is global.

use crate::config::BusConfig;
use crate::dispatch::{duration_ms, PublicationResult, PublishOptions};
use crate::error::BusError;
use crate::events::Event;
use crate::handler::{handler_fn, HandlerRef};
use crate::pattern::TopicPattern;
use crate::registry::{SubscribeOptions, SubscriptionEntry, SubscriptionId, SubscriptionRegistry};
use crate::stats::{BusStats, BusStatsSnapshot};
use crate::subscription::Subscription;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Shared state behind every [`EventBus`] clone and [`Subscription`] handle.
pub(crate) struct BusInner {
    pub(crate) config: BusConfig,
    pub(crate) registry: RwLock<SubscriptionRegistry>,
    pub(crate) stats: BusStats,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl BusInner {
    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.registry.write().remove(id);
        match removed {
            Some(entry) => {
                debug!(id = %id, topic = %entry.topic, "Subscription removed");
                true
            }
            None => false,
        }
    }

    /// Priority-ordered snapshot of live matches, retiring expired entries.
    pub(crate) fn matching_subscriptions(
        &self,
        topic: &str,
        min_priority: Option<i32>,
    ) -> Vec<Arc<SubscriptionEntry>> {
        let (matched, retired) = self
            .registry
            .write()
            .matching(topic, min_priority, Instant::now());
        if retired > 0 {
            BusStats::add(&self.stats.subscriptions_expired, retired as u64);
        }
        matched
    }

    /// Delivery bookkeeping after a handler settles.
    pub(crate) fn settle(&self, entry: &SubscriptionEntry) {
        let count = entry.record_delivery();
        if entry.is_live(Instant::now()) {
            return;
        }
        if self.registry.write().remove(entry.id).is_some() {
            BusStats::incr(&self.stats.subscriptions_expired);
            debug!(id = %entry.id, topic = %entry.topic, event_count = count, "Subscription expired after delivery");
        }
    }

    pub(crate) fn sweep_expired(&self) -> usize {
        let evicted = self.registry.write().sweep(Instant::now());
        if evicted > 0 {
            BusStats::add(&self.stats.subscriptions_expired, evicted as u64);
            debug!(evicted, "Expired subscriptions swept");
        }
        evicted
    }
}

impl Drop for BusInner {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

/// In-process publish/subscribe bus.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct EventBus {
    pub(crate) inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::build(BusConfig::default())
    }

    /// Create a bus with custom limits.
    ///
    /// # Errors
    ///
    /// `BusError::Config` if the configuration does not validate.
    pub fn with_config(config: BusConfig) -> Result<Self, BusError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    /// Create a bus configured from `EVENT_BUS_*` environment variables.
    pub fn from_env() -> Result<Self, BusError> {
        Self::with_config(BusConfig::from_env())
    }

    fn build(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                registry: RwLock::new(SubscriptionRegistry::new(config.clone())),
                config,
                stats: BusStats::default(),
                sweeper: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Start the periodic sweep on the current Tokio runtime.
    ///
    /// Calling `start` on a running bus is a no-op.
    ///
    /// # Errors
    ///
    /// `BusError::NotRunning` when called outside a Tokio runtime.
    pub fn start(&self) -> Result<(), BusError> {
        let mut sweeper = self.inner.sweeper.lock();
        if sweeper.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }

        let runtime = Handle::try_current().map_err(|_| BusError::NotRunning)?;
        let period = self.inner.config.cleanup_interval;
        let bus = Arc::downgrade(&self.inner);

        *sweeper = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = bus.upgrade() else {
                    break;
                };
                inner.sweep_expired();
            }
        }));

        info!(interval_ms = duration_ms(period), "Event bus started");
        Ok(())
    }

    /// Whether the sweep task is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner
            .sweeper
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the sweep and drop every subscription. The bus can be started again.
    pub fn destroy(&self) {
        if let Some(handle) = self.inner.sweeper.lock().take() {
            handle.abort();
        }
        let dropped = self.inner.registry.write().clear();
        info!(dropped, "Event bus destroyed");
    }

    // =========================================================================
    // SUBSCRIBE / UNSUBSCRIBE
    // =========================================================================

    /// Subscribe a handler to an exact topic.
    ///
    /// # Errors
    ///
    /// - `BusError::InvalidArgument` - empty topic
    /// - `BusError::CapacityExceeded` - global or per-topic cap reached
    pub fn subscribe(
        &self,
        topic: &str,
        handler: HandlerRef,
        options: SubscribeOptions,
    ) -> Result<Subscription, BusError> {
        self.register(topic, false, handler, options)
    }

    /// Subscribe a handler to every topic a wildcard pattern accepts.
    ///
    /// Pattern subscriptions count against the global cap only.
    pub fn subscribe_pattern(
        &self,
        pattern: &str,
        handler: HandlerRef,
        options: SubscribeOptions,
    ) -> Result<Subscription, BusError> {
        self.register(pattern, true, handler, options)
    }

    /// Subscribe to an exact topic for exactly one delivery.
    ///
    /// Like [`EventBus::subscribe`], a `*` in `topic` is matched literally.
    pub fn subscribe_once(
        &self,
        topic: &str,
        handler: HandlerRef,
        options: SubscribeOptions,
    ) -> Result<Subscription, BusError> {
        self.register(topic, false, handler, options.max_events(1))
    }

    /// Subscribe to a wildcard pattern for exactly one delivery.
    pub fn subscribe_pattern_once(
        &self,
        pattern: &str,
        handler: HandlerRef,
        options: SubscribeOptions,
    ) -> Result<Subscription, BusError> {
        self.register(pattern, true, handler, options.max_events(1))
    }

    fn register(
        &self,
        topic: &str,
        is_pattern: bool,
        handler: HandlerRef,
        options: SubscribeOptions,
    ) -> Result<Subscription, BusError> {
        let entry = self
            .inner
            .registry
            .write()
            .insert(topic, is_pattern, handler, options)?;
        Ok(Subscription::new(
            entry.id,
            entry.topic.clone(),
            is_pattern,
            Arc::downgrade(&self.inner),
        ))
    }

    /// Remove a subscription by id. Returns whether anything was removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.unsubscribe(id)
    }

    /// Remove every exact subscription on `topic` bound to this handler.
    pub fn unsubscribe_handler(&self, topic: &str, handler: &HandlerRef) -> bool {
        let removed = self.inner.registry.write().remove_handler(topic, handler);
        if removed > 0 {
            debug!(topic, removed, "Subscriptions removed by handler");
        }
        removed > 0
    }

    /// Drop every subscription.
    pub fn clear_all_subscriptions(&self) {
        let dropped = self.inner.registry.write().clear();
        debug!(dropped, "All subscriptions cleared");
    }

    /// Evict expired subscriptions now instead of waiting for the timer.
    pub fn sweep_expired(&self) -> usize {
        self.inner.sweep_expired()
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Live subscriptions, exact or pattern, that would receive `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .registry
            .read()
            .count_matching(topic, Instant::now())
    }

    #[must_use]
    pub fn has_listeners(&self, topic: &str) -> bool {
        self.subscriber_count(topic) > 0
    }

    /// Literal topics that currently have a live subscriber.
    #[must_use]
    pub fn active_topics(&self) -> Vec<String> {
        self.inner.registry.read().active_topics(Instant::now())
    }

    /// Live subscriptions, exact and pattern.
    ///
    /// Expired entries the sweep has not reached yet are not counted.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.registry.read().live_count(Instant::now())
    }

    #[must_use]
    pub fn stats(&self) -> BusStatsSnapshot {
        let active = self.subscription_count();
        self.inner.stats.snapshot(active)
    }

    // =========================================================================
    // PUBLISH
    // =========================================================================

    /// Publish `data` to `topic`.
    ///
    /// With `wait_for_handlers` the call resolves once every selected handler
    /// has settled (or the timeout elapses) and rejects with
    /// `BusError::Rejected` if any failure was propagated. Otherwise it returns
    /// right away with an empty error list and dispatch continues in the
    /// background.
    ///
    /// # Errors
    ///
    /// - `BusError::InvalidArgument` - empty topic
    /// - `BusError::NotRunning` - background dispatch outside a Tokio runtime
    /// - `BusError::Rejected` - awaited publish with a propagated failure
    pub async fn publish(
        &self,
        topic: &str,
        data: Value,
        options: PublishOptions,
    ) -> Result<PublicationResult, BusError> {
        self.inner.publish(topic, data, options).await
    }

    /// Wait for the next event on a topic or pattern.
    ///
    /// A `topic` containing `*` is treated as a pattern.
    ///
    /// # Errors
    ///
    /// `BusError::Timeout` if nothing arrives in time.
    pub async fn next_event(&self, topic: &str, timeout: Duration) -> Result<Event, BusError> {
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let subscription = self.register(
            topic,
            TopicPattern::is_pattern(topic),
            handler_fn(move |event| {
                if let Some(tx) = slot.lock().take() {
                    // Receiver gone means the waiter timed out
                    let _ = tx.send(event);
                }
                async { Ok(()) }
            }),
            SubscribeOptions::default().max_events(1),
        )?;

        let outcome = tokio::time::timeout(timeout, rx).await;
        subscription.unsubscribe();

        match outcome {
            Ok(Ok(event)) => Ok(event),
            Ok(Err(_)) => Err(BusError::NotRunning),
            Err(_) => Err(BusError::Timeout {
                topic: topic.to_string(),
                timeout_ms: duration_ms(timeout),
            }),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
