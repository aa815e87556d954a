//! Error types for the event bus

use crate::dispatch::PublicationResult;
use crate::registry::SubscriptionId;
use std::fmt;
use thiserror::Error;

/// Which capacity limit a rejected subscribe ran into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapacityScope {
    /// The bus-wide subscription cap.
    Global,
    /// The cap on exact subscriptions for one topic.
    Topic(String),
}

impl fmt::Display for CapacityScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::Topic(topic) => write!(f, "topic '{topic}'"),
        }
    }
}

/// Errors surfaced by bus operations.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// Bad call-site input. Always returned synchronously, never collected.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A subscription limit has been reached.
    #[error("Subscription capacity exceeded ({scope}): {current} >= {max}")]
    CapacityExceeded {
        scope: CapacityScope,
        current: usize,
        max: usize,
    },

    /// A handler or filter failed during dispatch.
    #[error("Handler for subscription {subscription_id} on '{topic}' failed: {message}")]
    Handler {
        subscription_id: SubscriptionId,
        topic: String,
        message: String,
    },

    /// The `wait_for_handlers` deadline elapsed.
    #[error("Publish to '{topic}' timed out after {timeout_ms}ms")]
    Timeout { topic: String, timeout_ms: u64 },

    /// An awaited publish rejected. `result` still lists every collected error.
    #[error("Publish to '{topic}' rejected: {cause}")]
    Rejected {
        topic: String,
        #[source]
        cause: Box<BusError>,
        result: PublicationResult,
    },

    /// The operation needs a Tokio runtime, or the bus is gone.
    #[error("Event bus is not running")]
    NotRunning,

    /// Invalid bus configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl BusError {
    /// The partial or full result attached to a rejection, if any.
    #[must_use]
    pub fn publication_result(&self) -> Option<&PublicationResult> {
        match self {
            Self::Rejected { result, .. } => Some(result),
            _ => None,
        }
    }

    /// True for errors raised by handlers or filters.
    #[must_use]
    pub fn is_handler_error(&self) -> bool {
        matches!(self, Self::Handler { .. })
    }

    /// True for wait deadline errors.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Error returned by a handler or a filter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Create a handler error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Wrap any displayable error.
    pub fn from_error<E: std::error::Error + ?Sized>(err: &E) -> Self {
        Self::new(err.to_string())
    }

    /// The failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::from_error(&err)
    }
}
