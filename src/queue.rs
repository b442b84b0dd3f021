//! Deduplicating work queue and worker pool
//!
//! Watchers add object keys; workers take them one at a time. A key is never
//! handed to two workers at once: adding a key that is being processed marks
//! it dirty, and it is queued again when the worker calls [`WorkQueue::done`].
//!
//! Delayed adds keep at most one deadline per key. A later [`WorkQueue::add_after`]
//! for the same key moves that deadline instead of arming a second timer.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Namespace and name of a queued object
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// What [`WorkQueue::add`] did with a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Queued,
    /// Already waiting in the queue
    Deduplicated,
    /// Being processed; queued again once done
    Deferred,
    /// Queue at capacity; key dropped
    Full,
    ShutDown,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<ObjectKey>,
    queued: HashSet<ObjectKey>,
    processing: HashSet<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    /// Pending delayed adds; a key is present while its timer task runs
    scheduled: HashMap<ObjectKey, Instant>,
    shutdown: bool,
}

pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl WorkQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add(&self, key: ObjectKey) -> AddOutcome {
        let mut state = self.lock();
        if state.shutdown {
            return AddOutcome::ShutDown;
        }
        if state.queued.contains(&key) {
            return AddOutcome::Deduplicated;
        }
        if state.processing.contains(&key) {
            state.dirty.insert(key);
            return AddOutcome::Deferred;
        }
        if state.queue.len() >= self.capacity {
            warn!(%key, capacity = self.capacity, "Work queue full, dropping key");
            return AddOutcome::Full;
        }

        state.queued.insert(key.clone());
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
        AddOutcome::Queued
    }

    /// Add `key` once `delay` has elapsed.
    ///
    /// Replaces any deadline already pending for `key`.
    pub fn add_after(self: &Arc<Self>, key: ObjectKey, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let deadline = Instant::now() + delay;
        {
            let mut state = self.lock();
            if state.shutdown {
                return;
            }
            if state.scheduled.insert(key.clone(), deadline).is_some() {
                debug!(%key, ?delay, "Rescheduled pending requeue");
                return;
            }
        }

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let Some(deadline) = queue.lock().scheduled.get(&key).copied() else {
                    return;
                };
                tokio::time::sleep_until(deadline).await;

                let mut state = queue.lock();
                let due = match state.scheduled.get(&key).copied() {
                    Some(current) => current <= Instant::now(),
                    None => return,
                };
                if due {
                    state.scheduled.remove(&key);
                    drop(state);
                    queue.add(key);
                    return;
                }
            }
        });
    }

    /// Number of keys waiting on a delayed add
    pub fn scheduled(&self) -> usize {
        self.lock().scheduled.len()
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.shutdown {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.queued.remove(&key);
                    state.processing.insert(key.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Release `key` after processing, re-queueing it if it was added
    /// meanwhile.
    pub fn done(&self, key: &ObjectKey) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.remove(key) && !state.shutdown && !state.queued.contains(key) {
            state.queued.insert(key.clone());
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shutdown(&self) {
        {
            let mut state = self.lock();
            state.shutdown = true;
            state.scheduled.clear();
        }
        self.notify.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.lock().shutdown
    }
}

/// Drain `queue` with `workers` concurrent workers until it shuts down.
///
/// `handler` returns the delay after which the key should be reconciled
/// again, if any.
pub async fn run_workers<F, Fut>(queue: Arc<WorkQueue>, workers: usize, handler: F)
where
    F: Fn(ObjectKey) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<Duration>> + Send + 'static,
{
    let handler = Arc::new(handler);
    let tasks = (0..workers.max(1)).map(|worker| {
        let queue = Arc::clone(&queue);
        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            while let Some(key) = queue.get().await {
                debug!(worker, %key, "Processing key");
                let requeue = match AssertUnwindSafe(handler(key.clone())).catch_unwind().await {
                    Ok(requeue) => requeue,
                    Err(_) => {
                        warn!(worker, %key, "Handler panicked");
                        None
                    }
                };
                queue.done(&key);
                if let Some(delay) = requeue {
                    queue.add_after(key, delay);
                }
            }
            debug!(worker, "Worker stopped");
        })
    });

    for result in futures::future::join_all(tasks).await {
        if let Err(e) = result {
            warn!(error = %e, "Worker task failed");
        }
    }
}
