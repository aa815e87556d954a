//! # Bus Telemetry
//!
//! Observability for hosts embedding the event bus.
//!
//! ## Components
//!
//! - **Logs**: global `tracing` subscriber with `EnvFilter`, pretty or JSON
//! - **Metrics**: Prometheus collectors fed from [`event_bus::EventBus::stats`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bus_telemetry::{init_telemetry, spawn_stats_exporter, TelemetryConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let guard = init_telemetry(&TelemetryConfig::from_env()).expect("Failed to init telemetry");
//!     let bus = event_bus::EventBus::new();
//!     bus.start().expect("bus start");
//!
//!     let _exporter = spawn_stats_exporter(bus.clone(), guard.metrics(), Duration::from_secs(5));
//!     // serve guard.metrics().encode() on /metrics
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `OTEL_SERVICE_NAME` | `event-bus` | Service name in logs |
//! | `EVENT_BUS_LOG_LEVEL` | `info` | Log level filter |
//! | `EVENT_BUS_JSON_LOGS` | `false` | JSON log output |
//! | `EVENT_BUS_CONSOLE_OUTPUT` | `true` | Write logs to stdout |

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod config;
mod metrics;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use metrics::{BusMetrics, PublishTimer};
pub use tracing_setup::{env_filter, init_tracing};

use event_bus::EventBus;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging and create the metrics registry.
///
/// Returns a guard that owns the metrics for the lifetime of the application.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let metrics = Arc::new(BusMetrics::new()?);
    init_tracing(config)?;

    Ok(TelemetryGuard { metrics })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    metrics: Arc<BusMetrics>,
}

impl TelemetryGuard {
    #[must_use]
    pub fn metrics(&self) -> Arc<BusMetrics> {
        self.metrics.clone()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("Shutting down telemetry...");
    }
}

/// Periodically fold `bus.stats()` into `metrics` on the current runtime.
///
/// Ends on its own once the last other handle to the metrics is dropped.
pub fn spawn_stats_exporter(
    bus: EventBus,
    metrics: Arc<BusMetrics>,
    period: Duration,
) -> JoinHandle<()> {
    let metrics = Arc::downgrade(&metrics);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(metrics) = metrics.upgrade() else {
                break;
            };
            metrics.update(&bus.stats());
        }
    })
}
