//! Caller-side handles: the cancel handle and the awaitable ticket.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::oneshot;

use crate::error::{LoadError, LoadResult};
use crate::key::ResourceKey;
use crate::transform::LoadedObject;

use super::Inner;

/// Cancels one specific subscription.
///
/// Use this when several loads share a resource (the same image shown in
/// many places) and only one of them should stop; `Loader::cancel` stops
/// all of them.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    target: Option<(ResourceKey, u64)>,
    cancelled: Arc<AtomicBool>,
    loader: Weak<Inner>,
}

impl CancelHandle {
    pub(crate) fn new(key: ResourceKey, id: u64, cancelled: Arc<AtomicBool>, loader: Weak<Inner>) -> Self {
        Self {
            target: Some((key, id)),
            cancelled,
            loader,
        }
    }

    /// Handle for a load that failed before it was registered.
    pub(crate) fn detached(cancelled: Arc<AtomicBool>) -> Self {
        Self {
            target: None,
            cancelled,
            loader: Weak::new(),
        }
    }

    pub fn key(&self) -> Option<&ResourceKey> {
        self.target.as_ref().map(|(key, _)| key)
    }

    /// Whether `cancel` has been called on this handle (or a clone).
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Cancel this subscription only. The fetch and sibling subscriptions
    /// carry on. Idempotent; no effect once the outcome was delivered.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);

        let Some((key, id)) = &self.target else {
            return;
        };
        if let Some(inner) = self.loader.upgrade() {
            inner.cancel_subscriber(key, *id);
        }
    }
}

/// Pending outcome of one `load` call.
///
/// Await it (directly or via [`LoadTicket::wait`]) for the single terminal
/// outcome. Dropping the ticket does not cancel the load.
#[derive(Debug)]
pub struct LoadTicket {
    handle: CancelHandle,
    rx: oneshot::Receiver<LoadResult<LoadedObject>>,
}

impl LoadTicket {
    pub(crate) fn new(handle: CancelHandle, rx: oneshot::Receiver<LoadResult<LoadedObject>>) -> Self {
        Self { handle, rx }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.handle.clone()
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Wait for the outcome.
    ///
    /// A load abandoned without an outcome (runtime shut down mid-flight)
    /// reports `Cancelled`.
    pub async fn wait(self) -> LoadResult<LoadedObject> {
        self.rx.await.unwrap_or(Err(LoadError::Cancelled))
    }
}

impl IntoFuture for LoadTicket {
    type Output = LoadResult<LoadedObject>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}
