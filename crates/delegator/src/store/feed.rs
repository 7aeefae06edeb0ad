//! Change-handler registry shared by the store implementations.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;

use crate::resource::{Object, ObjectKey};

struct Handler<T> {
    key: ObjectKey,
    /// Revisions at or below this were part of the replayed snapshot.
    after: u64,
    tx: mpsc::UnboundedSender<T>,
}

struct FeedInner<T> {
    handlers: Mutex<BTreeMap<u64, Handler<T>>>,
    next_id: AtomicU64,
}

impl<T> FeedInner<T> {
    fn handlers(&self) -> MutexGuard<'_, BTreeMap<u64, Handler<T>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fans object revisions out to the subscriptions whose key selects them.
pub struct ChangeFeed<T> {
    inner: Arc<FeedInner<T>>,
}

impl<T> Clone for ChangeFeed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Object> Default for ChangeFeed<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Object> ChangeFeed<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FeedInner {
                handlers: Mutex::new(BTreeMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Registers a handler. `snapshot` is delivered first; afterwards only
    /// revisions newer than `after` are delivered.
    ///
    /// Callers must hold whatever lock orders their writes against
    /// [`publish`](Self::publish) while taking the snapshot and registering.
    pub fn subscribe(&self, key: ObjectKey, snapshot: Vec<T>, after: u64) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        for obj in snapshot {
            // The receiver is alive, it is returned below.
            let _ = tx.send(obj);
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.handlers().insert(id, Handler { key, after, tx });
        log::trace!("Registered change handler {} for {}", id, T::KIND);

        Subscription {
            id,
            rx,
            feed: Arc::downgrade(&self.inner),
            active: true,
        }
    }

    /// Delivers `obj` to every matching handler. Handlers whose receiver is
    /// gone are dropped.
    pub fn publish(&self, obj: &T) {
        let key = obj.key();
        let revision = obj.meta().resource_version;
        self.inner.handlers().retain(|_, handler| {
            if !handler.key.selects(&key) || revision <= handler.after {
                return true;
            }
            handler.tx.send(obj.clone()).is_ok()
        });
    }

    /// Number of live handlers.
    pub fn handler_count(&self) -> usize {
        self.inner.handlers().len()
    }
}

/// A live change subscription. Unregisters itself exactly once, on
/// [`cancel`](Self::cancel) or drop.
pub struct Subscription<T> {
    id: u64,
    rx: mpsc::UnboundedReceiver<T>,
    feed: Weak<FeedInner<T>>,
    active: bool,
}

impl<T> Subscription<T> {
    /// Next revision, or `None` once cancelled and drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn cancel(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(feed) = self.feed.upgrade() {
            feed.handlers().remove(&self.id);
        }
        self.rx.close();
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}
