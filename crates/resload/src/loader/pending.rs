//! In-flight load bookkeeping.
//!
//! The table maps each key to at most one [`PendingLoad`]. All access goes
//! through the loader's single table lock; nothing in here awaits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::oneshot;

use crate::error::{LoadError, LoadResult};
use crate::key::ResourceKey;
use crate::transform::{LoadedObject, Transform};

pub(crate) type OutcomeSender = oneshot::Sender<LoadResult<LoadedObject>>;

/// One caller's registration on a pending load.
#[derive(Debug)]
pub(crate) struct Subscriber {
    pub(crate) id: u64,
    pub(crate) transform: Option<Transform>,
    cancelled: Arc<AtomicBool>,
    tx: OutcomeSender,
}

impl Subscriber {
    pub(crate) fn new(
        id: u64,
        transform: Option<Transform>,
        cancelled: Arc<AtomicBool>,
        tx: OutcomeSender,
    ) -> Self {
        Self {
            id,
            transform,
            cancelled,
            tx,
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Deliver the terminal outcome. A subscriber cancelled before this point
    /// receives `Cancelled` instead.
    pub(crate) fn complete(self, result: LoadResult<LoadedObject>) {
        let result = if self.is_cancelled() {
            Err(LoadError::Cancelled)
        } else {
            result
        };
        // The receiver may already be gone; nobody is left to tell.
        let _ = self.tx.send(result);
    }

    pub(crate) fn cancel(self) {
        self.cancelled.store(true, Ordering::Release);
        let _ = self.tx.send(Err(LoadError::Cancelled));
    }
}

/// The single in-flight unit of work for one key.
#[derive(Debug)]
pub(crate) struct PendingLoad {
    subscribers: Vec<Subscriber>,
    started: Instant,
}

impl PendingLoad {
    fn new(first: Subscriber) -> Self {
        Self {
            subscribers: vec![first],
            started: Instant::now(),
        }
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Subscribers still attached, in attach order.
    pub(crate) fn subscribers(&self) -> &[Subscriber] {
        &self.subscribers
    }

    pub(crate) fn started(&self) -> Instant {
        self.started
    }

    /// Subscribers in attach order.
    pub(crate) fn into_subscribers(self) -> Vec<Subscriber> {
        self.subscribers
    }
}

/// Key → pending load, plus subscriber id allocation.
#[derive(Debug, Default)]
pub(crate) struct PendingTable {
    loads: HashMap<ResourceKey, PendingLoad>,
    next_id: u64,
}

/// Whether a subscription started a new pending load or joined one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Attach {
    Started,
    Coalesced,
}

impl PendingTable {
    pub(crate) fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub(crate) fn attach(&mut self, key: &ResourceKey, subscriber: Subscriber) -> Attach {
        match self.loads.get_mut(key) {
            Some(pending) => {
                pending.subscribers.push(subscriber);
                Attach::Coalesced
            }
            None => {
                self.loads.insert(key.clone(), PendingLoad::new(subscriber));
                Attach::Started
            }
        }
    }

    pub(crate) fn get(&self, key: &ResourceKey) -> Option<&PendingLoad> {
        self.loads.get(key)
    }

    pub(crate) fn contains(&self, key: &ResourceKey) -> bool {
        self.loads.contains_key(key)
    }

    /// Take one subscriber off a pending load; the load itself stays.
    pub(crate) fn detach(&mut self, key: &ResourceKey, id: u64) -> Option<Subscriber> {
        let pending = self.loads.get_mut(key)?;
        let index = pending.subscribers.iter().position(|s| s.id == id)?;
        Some(pending.subscribers.remove(index))
    }

    /// Take every subscriber off a pending load; the load itself stays.
    pub(crate) fn detach_all(&mut self, key: &ResourceKey) -> Vec<Subscriber> {
        self.loads
            .get_mut(key)
            .map(|pending| std::mem::take(&mut pending.subscribers))
            .unwrap_or_default()
    }

    /// Destroy the pending load.
    pub(crate) fn finish(&mut self, key: &ResourceKey) -> Option<PendingLoad> {
        self.loads.remove(key)
    }
}
