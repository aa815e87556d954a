//! # Bus Events
//!
//! The immutable envelope built for every publish, and the payload of the
//! bus's own failure notifications.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// Well-known topic for background dispatch failures.
pub const SYSTEM_ERROR_TOPIC: &str = "system.error";

/// Component name the bus reports itself as.
pub const BUS_COMPONENT: &str = "event-bus";

/// Provenance of an event, as supplied by the producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSource {
    /// Producing component.
    pub component: String,
    /// Operation that emitted the event, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

impl EventSource {
    /// Source with only a component name.
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            operation: None,
        }
    }

    /// Attach the emitting operation.
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }
}

/// An event as delivered to handlers.
///
/// `topic` is always the literal topic that was published to, never the
/// pattern a subscriber registered with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub topic: String,
    pub data: Value,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<EventSource>,
}

impl Event {
    pub(crate) fn new(topic: &str, data: Value, source: Option<EventSource>) -> Self {
        Self {
            topic: topic.to_string(),
            data,
            timestamp: current_timestamp_ms(),
            source,
        }
    }
}

/// Payload published on [`SYSTEM_ERROR_TOPIC`] when background dispatch fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemErrorPayload {
    pub source: String,
    pub operation: String,
    pub topic: String,
    pub error: String,
    pub timestamp: u64,
}

impl SystemErrorPayload {
    pub(crate) fn background_publish(topic: &str, error: String) -> Self {
        Self {
            source: BUS_COMPONENT.to_string(),
            operation: "publish".to_string(),
            topic: topic.to_string(),
            error,
            timestamp: current_timestamp_ms(),
        }
    }
}

/// Get current Unix timestamp in milliseconds.
pub(crate) fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
