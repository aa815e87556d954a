//! Bus configuration and validation
//!
//! # Example
//!
//! ```ignore
//! use event_bus::BusConfig;
//! use std::time::Duration;
//!
//! let config = BusConfig::default()
//!     .with_max_subscriptions(500)
//!     .with_max_subscriptions_per_topic(50)
//!     .with_cleanup_interval(Duration::from_secs(5));
//! config.validate().expect("Valid config");
//! ```

use crate::error::BusError;
use crate::{
    DEFAULT_CLEANUP_INTERVAL_SECS, DEFAULT_MAX_SUBSCRIPTIONS, DEFAULT_MAX_SUBSCRIPTIONS_PER_TOPIC,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Capacity limits and timer settings for an [`EventBus`](crate::EventBus).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Maximum live subscriptions across all topics and patterns
    pub max_subscriptions: usize,
    /// Maximum live exact-topic subscriptions on a single topic
    pub max_subscriptions_per_topic: usize,
    /// Period of the background sweep that evicts expired subscriptions
    pub cleanup_interval: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_subscriptions: DEFAULT_MAX_SUBSCRIPTIONS,
            max_subscriptions_per_topic: DEFAULT_MAX_SUBSCRIPTIONS_PER_TOPIC,
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
        }
    }
}

impl BusConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `EVENT_BUS_MAX_SUBSCRIPTIONS`: global cap (default: 10000)
    /// - `EVENT_BUS_MAX_PER_TOPIC`: per-topic cap (default: 1000)
    /// - `EVENT_BUS_CLEANUP_INTERVAL_SECS`: sweep period (default: 60)
    ///
    /// Missing or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_subscriptions: env::var("EVENT_BUS_MAX_SUBSCRIPTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_subscriptions),

            max_subscriptions_per_topic: env::var("EVENT_BUS_MAX_PER_TOPIC")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_subscriptions_per_topic),

            cleanup_interval: env::var("EVENT_BUS_CLEANUP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.cleanup_interval),
        }
    }

    /// Validate limits and interval.
    pub fn validate(&self) -> Result<(), BusError> {
        if self.max_subscriptions == 0 {
            return Err(BusError::Config(
                "max_subscriptions cannot be 0".to_string(),
            ));
        }

        if self.max_subscriptions_per_topic == 0 {
            return Err(BusError::Config(
                "max_subscriptions_per_topic cannot be 0".to_string(),
            ));
        }

        if self.max_subscriptions_per_topic > self.max_subscriptions {
            return Err(BusError::Config(format!(
                "max_subscriptions_per_topic ({}) exceeds max_subscriptions ({})",
                self.max_subscriptions_per_topic, self.max_subscriptions
            )));
        }

        if self.cleanup_interval.is_zero() {
            return Err(BusError::Config(
                "cleanup_interval must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder-style method to set the global subscription cap
    pub fn with_max_subscriptions(mut self, max: usize) -> Self {
        self.max_subscriptions = max;
        self
    }

    /// Builder-style method to set the per-topic subscription cap
    pub fn with_max_subscriptions_per_topic(mut self, max: usize) -> Self {
        self.max_subscriptions_per_topic = max;
        self
    }

    /// Builder-style method to set the sweep period
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }
}
