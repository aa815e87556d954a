//! # Event Handlers
//!
//! Handlers are heterogeneous: some finish immediately, some suspend. Both
//! kinds implement [`EventHandler`], whose `handle` always returns a future;
//! synchronous closures are wrapped so theirs is already complete.

use crate::error::HandlerError;
use crate::events::Event;
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Shared handler reference stored by the registry.
///
/// The same `HandlerRef` passed to `subscribe` can later be passed to
/// [`EventBus::unsubscribe_handler`](crate::EventBus::unsubscribe_handler);
/// identity is pointer identity.
pub type HandlerRef = Arc<dyn EventHandler>;

/// Predicate evaluated before a handler is invoked.
///
/// `Ok(false)` skips the subscription; `Err` skips it and records the error.
pub type EventFilter = Arc<dyn Fn(&Event) -> Result<bool, HandlerError> + Send + Sync>;

/// A unit of work invoked once per delivered event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event.
    async fn handle(&self, event: Event) -> Result<(), HandlerError>;
}

/// Adapter for async closures. See [`handler_fn`].
pub struct FnHandler<F, Fut> {
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F, Fut>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, event: Event) -> Result<(), HandlerError> {
        (self.f)(event).await
    }
}

/// Adapter for synchronous closures. See [`sync_handler`].
pub struct SyncHandler<F> {
    f: F,
}

#[async_trait]
impl<F> EventHandler for SyncHandler<F>
where
    F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync,
{
    async fn handle(&self, event: Event) -> Result<(), HandlerError> {
        (self.f)(&event)
    }
}

/// Wrap an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> HandlerRef
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler {
        f,
        _fut: PhantomData,
    })
}

/// Wrap a synchronous closure as a handler.
pub fn sync_handler<F>(f: F) -> HandlerRef
where
    F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    Arc::new(SyncHandler { f })
}

/// Pointer identity of two handler references.
pub(crate) fn same_handler(a: &HandlerRef, b: &HandlerRef) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
