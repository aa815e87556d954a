//! # Event Bus - In-Process Publish/Subscribe
//!
//! Decouples producers of domain events from their consumers. Producers
//! publish to a topic; every live subscription whose topic equals it, or whose
//! wildcard pattern accepts it, gets the event.
//!
//! ```text
//! ┌──────────────┐                        ┌──────────────┐
//! │  Producer    │                        │  Consumer    │
//! │              │    publish()           │              │
//! │              │ ──────┐                │              │
//! └──────────────┘       │                └──────────────┘
//!                        ▼                        ↑
//!                  ┌──────────────┐  priority     │
//!                  │  Registry    │ ──────────────┘
//!                  │  + Dispatch  │  subscribe()
//!                  └──────────────┘
//! ```
//!
//! ## Delivery
//!
//! - Handlers are invoked in priority order (higher first), ties broken by
//!   registration order.
//! - `wait_for_handlers` publishes await every handler and may reject with the
//!   first propagated error. Fire-and-forget publishes return immediately and
//!   report background failures on [`SYSTEM_ERROR_TOPIC`].
//! - Subscriptions retire on `max_events`, `expires_in`, explicit
//!   unsubscribe, or [`EventBus::clear_all_subscriptions`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use event_bus::{handler_fn, EventBus, PublishOptions, SubscribeOptions};
//! use serde_json::json;
//!
//! let bus = EventBus::new();
//! bus.start()?;
//!
//! bus.subscribe(
//!     "order.created",
//!     handler_fn(|event| async move {
//!         tracing::info!(data = %event.data, "order created");
//!         Ok(())
//!     }),
//!     SubscribeOptions::default(),
//! )?;
//!
//! let result = bus
//!     .publish("order.created", json!({ "id": 7 }), PublishOptions::wait())
//!     .await?;
//! assert_eq!(result.delivered_to_count, 1);
//! ```

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod bus;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod handler;
pub mod pattern;
pub mod registry;
pub mod stats;
pub mod subscription;

// Re-export main types
pub use bus::EventBus;
pub use config::BusConfig;
pub use dispatch::{PublicationResult, PublishOptions};
pub use error::{BusError, CapacityScope, HandlerError};
pub use events::{Event, EventSource, SystemErrorPayload, SYSTEM_ERROR_TOPIC};
pub use handler::{handler_fn, sync_handler, EventFilter, EventHandler, HandlerRef};
pub use pattern::TopicPattern;
pub use registry::{SubscribeOptions, SubscriptionId};
pub use stats::BusStatsSnapshot;
pub use subscription::Subscription;

/// Default cap on live subscriptions across all topics.
pub const DEFAULT_MAX_SUBSCRIPTIONS: usize = 10_000;

/// Default cap on live exact-topic subscriptions per topic.
pub const DEFAULT_MAX_SUBSCRIPTIONS_PER_TOPIC: usize = 1_000;

/// Default period of the expired-subscription sweep, in seconds.
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60;

/// Wildcard token accepted by pattern subscriptions.
pub const WILDCARD: char = '*';
