//! Result dispatch to the subscribers of a finished load.

use bytes::Bytes;
use tokio::task::JoinSet;
use tracing::debug;

use crate::error::{LoadError, LoadResult};
use crate::key::ResourceKey;
use crate::transform::{self, LoadedObject, Transform};

use super::pending::Subscriber;

/// Transform outputs accumulated for one resolved load.
///
/// Each distinct transform runs at most once; subscribers sharing a
/// transform share its output. A transform failure only fails the
/// subscribers using it. A failed load fails everyone with the same error.
#[derive(Debug)]
pub(crate) struct Outputs {
    key: ResourceKey,
    data: LoadResult<Bytes>,
    done: Vec<(Option<Transform>, LoadResult<LoadedObject>)>,
}

impl Outputs {
    pub(crate) fn new(key: ResourceKey, data: LoadResult<Bytes>) -> Self {
        Self {
            key,
            data,
            done: Vec::new(),
        }
    }

    /// Distinct transforms wanted by live subscribers that have no output yet.
    ///
    /// Cancelled subscribers are skipped so their transform is not run on
    /// their behalf.
    pub(crate) fn missing(&self, subscribers: &[Subscriber]) -> Vec<Option<Transform>> {
        if self.data.is_err() {
            return Vec::new();
        }
        let mut missing: Vec<Option<Transform>> = Vec::new();
        for subscriber in subscribers.iter().filter(|s| !s.is_cancelled()) {
            let wanted = &subscriber.transform;
            let known = self.done.iter().any(|(t, _)| same_transform(t, wanted))
                || missing.iter().any(|t| same_transform(t, wanted));
            if !known {
                missing.push(wanted.clone());
            }
        }
        missing
    }

    /// Run the given transforms concurrently and record their outputs.
    pub(crate) async fn compute(&mut self, transforms: Vec<Option<Transform>>) {
        let data = match &self.data {
            Ok(data) => data.clone(),
            Err(_) => return,
        };

        let first = self.done.len();
        let mut tasks = JoinSet::new();
        for (offset, transform) in transforms.into_iter().enumerate() {
            // Stands in for a task that panics or is aborted.
            self.done.push((
                transform.clone(),
                Err(LoadError::Transform {
                    key: self.key.to_string(),
                    message: "transform task did not complete".to_string(),
                }),
            ));
            let task_key = self.key.clone();
            let task_data = data.clone();
            tasks.spawn(async move { (offset, transform::run(transform, &task_key, task_data).await) });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Ok((offset, output)) = joined {
                self.done[first + offset].1 = output;
            }
        }
        debug!(key = %self.key, transforms = self.done.len(), "transforms settled");
    }

    /// Send each subscriber its outcome, in subscription order.
    ///
    /// Only sends; safe to call with the pending table locked.
    pub(crate) fn deliver(&self, subscribers: Vec<Subscriber>) {
        for subscriber in subscribers {
            let outcome = self.outcome_for(&subscriber.transform);
            subscriber.complete(outcome);
        }
    }

    fn outcome_for(&self, transform: &Option<Transform>) -> LoadResult<LoadedObject> {
        if let Err(e) = &self.data {
            return Err(e.clone());
        }
        self.done
            .iter()
            .find(|(t, _)| same_transform(t, transform))
            .map(|(_, output)| output.clone())
            // Only reachable for a subscriber cancelled mid-dispatch, whose
            // `complete` answers `Cancelled` regardless.
            .unwrap_or(Err(LoadError::Cancelled))
    }
}

fn same_transform(a: &Option<Transform>, b: &Option<Transform>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.same_as(b),
        _ => false,
    }
}
