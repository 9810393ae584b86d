//! Ordered observer registry shared between control and audio contexts.
//!
//! The list is copy-on-write: `notify` takes a snapshot under a momentary
//! lock and calls observers after releasing it, so an observer may subscribe
//! or unsubscribe (itself included) while being notified.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Handle returned by `subscribe`, used to unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Observer<A> = Arc<dyn Fn(A) + Send + Sync>;

pub struct Subscribers<A> {
    next_id: AtomicU64,
    entries: Mutex<Arc<Vec<(SubscriptionId, Observer<A>)>>>,
}

impl<A: Copy> Subscribers<A> {
    pub fn new() -> Self {
        Subscribers {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Arc::new(Vec::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Arc<Vec<(SubscriptionId, Observer<A>)>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an observer; it is notified after every earlier one.
    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut entries = self.lock();
        let mut next: Vec<_> = entries.iter().cloned().collect();
        next.push((id, Arc::new(observer)));
        *entries = Arc::new(next);
        id
    }

    /// Remove an observer. Unknown ids are ignored; returns whether one was removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = self.lock();
        if !entries.iter().any(|(existing, _)| *existing == id) {
            return false;
        }
        let next: Vec<_> = entries
            .iter()
            .filter(|(existing, _)| *existing != id)
            .cloned()
            .collect();
        *entries = Arc::new(next);
        true
    }

    /// Call every observer in registration order.
    pub fn notify(&self, value: A) {
        let snapshot = Arc::clone(&self.lock());
        for (_, observer) in snapshot.iter() {
            observer(value);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<A: Copy> Default for Subscribers<A> {
    fn default() -> Self {
        Self::new()
    }
}
