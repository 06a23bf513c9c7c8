use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::event::{DomainEvent, SharedEvent};

/// Ordered queue of events an aggregate has caused but not yet published.
///
/// The queue is shared with any [`UnitOfWork`](crate::UnitOfWork) tracking the
/// aggregate, so the unit of work can remove exactly the events it persisted
/// once its transaction has committed.
#[derive(Default)]
pub struct PendingEvents {
    queue: Arc<Mutex<Vec<SharedEvent>>>,
}

impl PendingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<E: DomainEvent>(&self, event: E) {
        self.lock().push(Arc::new(event));
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the queue, oldest first. Nothing is removed.
    pub fn snapshot(&self) -> Vec<SharedEvent> {
        self.lock().clone()
    }

    /// Return and clear the queue.
    pub fn drain(&self) -> Vec<SharedEvent> {
        std::mem::take(&mut *self.lock())
    }

    pub(crate) fn staged(&self) -> StagedEvents {
        StagedEvents {
            queue: Arc::clone(&self.queue),
        }
    }

    // A Vec of immutable events is valid even if a holder panicked.
    fn lock(&self) -> MutexGuard<'_, Vec<SharedEvent>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for PendingEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.lock().iter()).finish()
    }
}

/// Unit-of-work side of a [`PendingEvents`] queue.
#[derive(Clone)]
pub(crate) struct StagedEvents {
    queue: Arc<Mutex<Vec<SharedEvent>>>,
}

impl StagedEvents {
    pub(crate) fn same_queue(&self, other: &StagedEvents) -> bool {
        Arc::ptr_eq(&self.queue, &other.queue)
    }

    pub(crate) fn snapshot(&self) -> Vec<SharedEvent> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove exactly `events` from the queue, matched by identity. Anything
    /// staged after the snapshot, or already removed by someone else, is
    /// left alone.
    pub(crate) fn discard(&self, events: &[SharedEvent]) {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue.retain(|queued| !events.iter().any(|done| Arc::ptr_eq(queued, done)));
    }
}
