//! Prometheus metrics for the event bus.
//!
//! All metrics follow the naming convention: `event_bus_<metric>_<unit>`
//!
//! The bus keeps its own counters; [`BusMetrics::update`] folds a
//! [`BusStatsSnapshot`] into Prometheus collectors, so scraping never takes
//! the registry lock.

use event_bus::BusStatsSnapshot;
use parking_lot::Mutex;
use prometheus::{
    exponential_buckets, Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry,
    TextEncoder,
};

use crate::TelemetryError;

/// Prometheus collectors for one bus instance.
pub struct BusMetrics {
    registry: Registry,
    events_published: IntCounter,
    deliveries: IntCounter,
    handler_errors: IntCounter,
    contained_errors: IntCounter,
    propagated_errors: IntCounter,
    timeouts: IntCounter,
    subscriptions_expired: IntCounter,
    active_subscriptions: IntGauge,
    publish_duration: Histogram,
    /// Highest values folded in so far
    last: Mutex<BusStatsSnapshot>,
}

fn counter(name: &str, help: &str) -> Result<IntCounter, TelemetryError> {
    IntCounter::new(name, help).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

impl BusMetrics {
    /// Create and register every collector in a fresh registry.
    pub fn new() -> Result<Self, TelemetryError> {
        let metrics = Self {
            registry: Registry::new(),
            events_published: counter(
                "event_bus_events_published_total",
                "Publish calls accepted by the bus",
            )?,
            deliveries: counter(
                "event_bus_deliveries_total",
                "Handler invocations that settled",
            )?,
            handler_errors: counter(
                "event_bus_handler_errors_total",
                "Handler and filter failures",
            )?,
            contained_errors: counter(
                "event_bus_contained_errors_total",
                "Failures contained by ignore_errors or isolate_errors",
            )?,
            propagated_errors: counter(
                "event_bus_propagated_errors_total",
                "Failures propagated to the publisher or system.error",
            )?,
            timeouts: counter(
                "event_bus_publish_timeouts_total",
                "Awaited publishes whose deadline elapsed",
            )?,
            subscriptions_expired: counter(
                "event_bus_subscriptions_expired_total",
                "Subscriptions retired by max_events or expiry",
            )?,
            active_subscriptions: IntGauge::new(
                "event_bus_subscriptions_active",
                "Live subscriptions",
            )
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?,
            publish_duration: Histogram::with_opts(
                HistogramOpts::new(
                    "event_bus_publish_duration_seconds",
                    "Time spent in awaited publishes",
                )
                .buckets(
                    exponential_buckets(0.0001, 2.0, 15)
                        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?,
                ),
            )
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?,
            last: Mutex::new(BusStatsSnapshot::default()),
        };

        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(metrics.events_published.clone()),
            Box::new(metrics.deliveries.clone()),
            Box::new(metrics.handler_errors.clone()),
            Box::new(metrics.contained_errors.clone()),
            Box::new(metrics.propagated_errors.clone()),
            Box::new(metrics.timeouts.clone()),
            Box::new(metrics.subscriptions_expired.clone()),
            Box::new(metrics.active_subscriptions.clone()),
            Box::new(metrics.publish_duration.clone()),
        ];

        for collector in collectors {
            metrics
                .registry
                .register(collector)
                .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
        }

        Ok(metrics)
    }

    /// Fold a snapshot in. Counters never move backwards, so a stale
    /// snapshot is a no-op for them.
    pub fn update(&self, snapshot: &BusStatsSnapshot) {
        let mut last = self.last.lock();

        let advance = |counter: &IntCounter, now: u64, seen: &mut u64| {
            counter.inc_by(now.saturating_sub(*seen));
            *seen = (*seen).max(now);
        };
        advance(&self.events_published, snapshot.events_published, &mut last.events_published);
        advance(&self.deliveries, snapshot.deliveries, &mut last.deliveries);
        advance(&self.handler_errors, snapshot.handler_errors, &mut last.handler_errors);
        advance(&self.contained_errors, snapshot.contained_errors, &mut last.contained_errors);
        advance(&self.propagated_errors, snapshot.propagated_errors, &mut last.propagated_errors);
        advance(&self.timeouts, snapshot.timeouts, &mut last.timeouts);
        advance(
            &self.subscriptions_expired,
            snapshot.subscriptions_expired,
            &mut last.subscriptions_expired,
        );

        self.active_subscriptions
            .set(i64::try_from(snapshot.active_subscriptions).unwrap_or(i64::MAX));
        last.active_subscriptions = snapshot.active_subscriptions;
    }

    /// Start timing a publish. Observation happens on drop.
    #[must_use]
    pub fn time_publish(&self) -> PublishTimer {
        PublishTimer {
            histogram: self.publish_duration.clone(),
            start: std::time::Instant::now(),
        }
    }

    /// Encode all metrics as Prometheus text format.
    pub fn encode(&self) -> Result<String, TelemetryError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Timer guard for publish latency.
pub struct PublishTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl Drop for PublishTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
    }
}
