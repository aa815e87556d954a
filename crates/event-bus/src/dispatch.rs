//! # Dispatch Engine
//!
//! One publish, end to end:
//!
//! 1. Validate the topic and build the [`Event`].
//! 2. Snapshot the priority-ordered matches from the registry.
//! 3. Run filters; a failing filter is recorded like a handler failure.
//! 4. Invoke every surviving handler, in snapshot order, as its own unit.
//! 5. After each unit settles, count the delivery and retire the
//!    subscription if that exhausted it.
//! 6. Optionally race the whole pass against a deadline.
//!
//! ## Error policy
//!
//! A failure is contained when the publish sets `ignore_errors` or the
//! subscription sets `isolate_errors`; otherwise it is propagated. Every
//! failure lands in [`PublicationResult::errors`] either way.
//!
//! Propagated failures reject an awaited publish. In fire-and-forget mode
//! they are reported on [`SYSTEM_ERROR_TOPIC`] by a secondary publish that
//! always ignores errors, so reporting cannot recurse more than once.

use crate::bus::BusInner;
use crate::error::{BusError, HandlerError};
use crate::events::{Event, EventSource, SystemErrorPayload, BUS_COMPONENT, SYSTEM_ERROR_TOPIC};
use crate::registry::SubscriptionEntry;
use crate::stats::BusStats;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

/// Per-call publish options.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Provenance attached to the event.
    pub source: Option<EventSource>,
    /// Skip subscriptions below this priority.
    pub min_priority: Option<i32>,
    /// Contain every handler failure for this call.
    pub ignore_errors: bool,
    /// Await handlers instead of dispatching in the background.
    pub wait_for_handlers: bool,
    /// Deadline for `wait_for_handlers`.
    pub timeout: Option<Duration>,
}

impl PublishOptions {
    /// Options for an awaited publish.
    #[must_use]
    pub fn wait() -> Self {
        Self {
            wait_for_handlers: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: EventSource) -> Self {
        self.source = Some(source);
        self
    }

    #[must_use]
    pub fn with_min_priority(mut self, floor: i32) -> Self {
        self.min_priority = Some(floor);
        self
    }

    #[must_use]
    pub fn ignore_errors(mut self) -> Self {
        self.ignore_errors = true;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Outcome of one publish.
#[derive(Debug, Clone, Default)]
pub struct PublicationResult {
    /// Subscriptions selected for delivery after filtering.
    pub delivered_to_count: usize,
    /// Every error collected during the pass, propagated or not.
    pub errors: Vec<BusError>,
}

impl PublicationResult {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Errors collected by one dispatch pass, shared across its units.
#[derive(Debug, Default)]
struct ErrorLog {
    errors: Vec<BusError>,
    first_propagated: Option<usize>,
}

type SharedLog = Arc<Mutex<ErrorLog>>;

impl ErrorLog {
    fn record(&mut self, err: BusError, propagate: bool) {
        if propagate && self.first_propagated.is_none() {
            self.first_propagated = Some(self.errors.len());
        }
        self.errors.push(err);
    }

    fn first_propagated(&self) -> Option<BusError> {
        self.first_propagated.map(|index| self.errors[index].clone())
    }
}

impl BusInner {
    pub(crate) async fn publish(
        self: &Arc<Self>,
        topic: &str,
        data: Value,
        options: PublishOptions,
    ) -> Result<PublicationResult, BusError> {
        if topic.is_empty() {
            return Err(BusError::InvalidArgument("topic must not be empty".to_string()));
        }

        // Background dispatch needs somewhere to run
        let runtime = if options.wait_for_handlers && options.timeout.is_none() {
            None
        } else {
            Some(Handle::try_current().map_err(|_| BusError::NotRunning)?)
        };

        BusStats::incr(&self.stats.events_published);

        let event = Event::new(topic, data, options.source.clone());
        let candidates = self.matching_subscriptions(topic, options.min_priority);
        let log = SharedLog::default();
        let targets = self.select_targets(&event, candidates, options.ignore_errors, &log);
        let delivered_to_count = targets.len();

        debug!(
            topic,
            delivered_to_count,
            wait = options.wait_for_handlers,
            "Publishing event"
        );

        let pass = dispatch_all(self.clone(), event, targets, options.ignore_errors, log.clone());

        if !options.wait_for_handlers {
            let Some(runtime) = runtime else {
                return Err(BusError::NotRunning);
            };
            let bus = self.clone();
            let topic = topic.to_string();
            let background = runtime.clone();
            runtime.spawn(async move {
                let completed = match options.timeout {
                    Some(limit) => {
                        // Spawned so that slow handlers keep running past the deadline
                        let pass = background.spawn(pass);
                        tokio::time::timeout(limit, pass).await.is_ok()
                    }
                    None => {
                        pass.await;
                        true
                    }
                };
                if !completed {
                    bus.record_timeout(&topic, options.timeout, options.ignore_errors, &log);
                }

                let failure = log.lock().first_propagated();
                if let Some(cause) = failure {
                    bus.report_background_failure(topic, cause).await;
                }
            });
            return Ok(PublicationResult {
                delivered_to_count,
                errors: Vec::new(),
            });
        }

        let completed = match (options.timeout, runtime) {
            (Some(limit), Some(runtime)) => {
                // Spawned so that slow handlers keep running past the deadline
                let pass = runtime.spawn(pass);
                tokio::time::timeout(limit, pass).await.is_ok()
            }
            _ => {
                pass.await;
                true
            }
        };

        if !completed {
            self.record_timeout(topic, options.timeout, options.ignore_errors, &log);
        }

        let (errors, first_propagated) = {
            let log = log.lock();
            (log.errors.clone(), log.first_propagated())
        };
        let result = PublicationResult {
            delivered_to_count,
            errors,
        };

        match first_propagated {
            Some(cause) => Err(BusError::Rejected {
                topic: topic.to_string(),
                cause: Box::new(cause),
                result,
            }),
            None => Ok(result),
        }
    }

    /// Apply filters and claim delivery slots, keeping snapshot order.
    fn select_targets(
        &self,
        event: &Event,
        candidates: Vec<Arc<SubscriptionEntry>>,
        ignore_errors: bool,
        log: &SharedLog,
    ) -> Vec<Arc<SubscriptionEntry>> {
        let mut targets = Vec::with_capacity(candidates.len());

        for entry in candidates {
            if let Some(filter) = &entry.filter {
                let verdict = catch_unwind(AssertUnwindSafe(|| filter(event)))
                    .unwrap_or_else(|panic| Err(HandlerError::new(panic_message(&*panic, "filter"))));
                match verdict {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(err) => {
                        self.record_failure(&entry, &event.topic, err, ignore_errors, log);
                        continue;
                    }
                }
            }

            if entry.try_reserve() {
                targets.push(entry);
            }
        }

        targets
    }

    fn record_timeout(&self, topic: &str, timeout: Option<Duration>, ignore_errors: bool, log: &SharedLog) {
        BusStats::incr(&self.stats.timeouts);
        let timeout_ms = timeout.map_or(0, duration_ms);
        let propagate = !ignore_errors;
        if propagate {
            error!(topic, timeout_ms, "Publish timed out waiting for handlers");
        } else {
            warn!(topic, timeout_ms, "Publish timed out waiting for handlers");
        }
        log.lock().record(
            BusError::Timeout {
                topic: topic.to_string(),
                timeout_ms,
            },
            propagate,
        );
    }

    fn record_failure(
        &self,
        entry: &SubscriptionEntry,
        topic: &str,
        err: HandlerError,
        ignore_errors: bool,
        log: &SharedLog,
    ) {
        BusStats::incr(&self.stats.handler_errors);
        let contained = ignore_errors || entry.isolate_errors;

        if contained {
            BusStats::incr(&self.stats.contained_errors);
            warn!(id = %entry.id, topic, error = %err, "Handler failed (contained)");
        } else {
            BusStats::incr(&self.stats.propagated_errors);
            error!(id = %entry.id, topic, error = %err, "Handler failed");
        }

        log.lock().record(
            BusError::Handler {
                subscription_id: entry.id,
                topic: topic.to_string(),
                message: err.message().to_string(),
            },
            !contained,
        );
    }

    /// Log a background failure and announce it on `system.error`.
    ///
    /// Returns a boxed future because it re-enters `publish`.
    fn report_background_failure(self: Arc<Self>, topic: String, cause: BusError) -> BoxFuture<'static, ()> {
        async move {
            error!(topic = %topic, error = %cause, "Background dispatch failed");

            let payload = SystemErrorPayload::background_publish(&topic, cause.to_string());
            let data = match serde_json::to_value(&payload) {
                Ok(data) => data,
                Err(err) => {
                    error!(topic = %topic, error = %err, "Failed to encode system.error payload");
                    return;
                }
            };

            // Forced on regardless of the failed call's options
            let options = PublishOptions {
                source: Some(EventSource::new(BUS_COMPONENT).with_operation("publish")),
                ignore_errors: true,
                wait_for_handlers: true,
                ..PublishOptions::default()
            };

            if let Err(secondary) = self.publish(SYSTEM_ERROR_TOPIC, data, options).await {
                error!(
                    topic = %topic,
                    original = %cause,
                    error = %secondary,
                    "Failed to publish system.error notification"
                );
            }
        }
        .boxed()
    }
}

/// Run every target, each as an independent unit. `join_all` polls the units
/// in order on the first pass, so invocation follows snapshot order.
async fn dispatch_all(
    bus: Arc<BusInner>,
    event: Event,
    targets: Vec<Arc<SubscriptionEntry>>,
    ignore_errors: bool,
    log: SharedLog,
) {
    let units = targets.into_iter().map(|entry| {
        let bus = bus.clone();
        let event = event.clone();
        let log = log.clone();
        async move {
            let outcome = AssertUnwindSafe(entry.handler.handle(event.clone()))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(HandlerError::new(panic_message(&*panic, "handler"))));

            if let Err(err) = outcome {
                bus.record_failure(&entry, &event.topic, err, ignore_errors, &log);
            }

            BusStats::incr(&bus.stats.deliveries);
            bus.settle(&entry);
        }
    });

    join_all(units).await;
}

/// Milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn panic_message(panic: &(dyn Any + Send), what: &str) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("{what} panicked: {detail}")
}
