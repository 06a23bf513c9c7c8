//! In-memory outbox store for tests and single-process setups.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;

use super::record::{OutboxRecord, OutboxStatus};
use super::store::{OutboxStore, OutboxTransaction};

#[derive(Default)]
struct State {
    // Insertion order doubles as the tiebreak for equal `occurred_at`.
    rows: Vec<OutboxRecord>,
    locked: HashSet<Uuid>,
    reject_commits: bool,
}

/// Thread-safe in-memory outbox.
///
/// Transactions buffer their writes until commit and hold row locks the way
/// `SELECT ... FOR UPDATE SKIP LOCKED` does: a row claimed by one open
/// transaction is invisible to every other claim until that transaction
/// commits, rolls back or is dropped. Clones share the same rows.
#[derive(Clone, Default)]
pub struct InMemoryOutboxStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every committed record, in insertion order.
    pub fn records(&self) -> Result<Vec<OutboxRecord>, StoreError> {
        Ok(self.lock("records")?.rows.clone())
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock("len")?.rows.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.lock("is_empty")?.rows.is_empty())
    }

    /// Make every following commit fail with [`StoreError::Unavailable`],
    /// as a lost database connection would.
    pub fn reject_commits(&self, reject: bool) -> Result<(), StoreError> {
        self.lock("reject_commits")?.reject_commits = reject;
        Ok(())
    }

    fn lock(&self, operation: &'static str) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::LockPoisoned(operation))
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    type Transaction = InMemoryTransaction;

    async fn begin(&self) -> Result<Self::Transaction, StoreError> {
        Ok(InMemoryTransaction {
            state: Arc::clone(&self.state),
            inserted: Vec::new(),
            updated: HashMap::new(),
            locked: Vec::new(),
            finished: false,
        })
    }

    async fn records_by_status(
        &self,
        status: OutboxStatus,
    ) -> Result<Vec<OutboxRecord>, StoreError> {
        let state = self.lock("records_by_status")?;
        let mut records: Vec<OutboxRecord> = state
            .rows
            .iter()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.occurred_at);
        Ok(records)
    }
}

/// Open transaction on an [`InMemoryOutboxStore`].
pub struct InMemoryTransaction {
    state: Arc<Mutex<State>>,
    inserted: Vec<OutboxRecord>,
    updated: HashMap<Uuid, OutboxRecord>,
    locked: Vec<Uuid>,
    finished: bool,
}

impl InMemoryTransaction {
    /// Records inserted by this transaction and not yet committed.
    pub fn staged(&self) -> &[OutboxRecord] {
        &self.inserted
    }

    fn lock(&self, operation: &'static str) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::LockPoisoned(operation))
    }

    fn release_locks(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            for id in self.locked.drain(..) {
                state.locked.remove(&id);
            }
        }
    }
}

#[async_trait]
impl OutboxTransaction for InMemoryTransaction {
    async fn insert(&mut self, record: OutboxRecord) -> Result<(), StoreError> {
        self.inserted.push(record);
        Ok(())
    }

    async fn claim_due(
        &mut self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>, StoreError> {
        let mut state = self.lock("claim_due")?;

        let mut due: Vec<&OutboxRecord> = state
            .rows
            .iter()
            .filter(|r| r.is_due(now) && !state.locked.contains(&r.id))
            .collect();
        due.sort_by_key(|r| r.occurred_at);
        let claimed: Vec<OutboxRecord> = due.into_iter().take(limit).cloned().collect();

        for record in &claimed {
            state.locked.insert(record.id);
        }
        drop(state);

        self.locked.extend(claimed.iter().map(|r| r.id));
        Ok(claimed)
    }

    async fn save(&mut self, record: &OutboxRecord) -> Result<(), StoreError> {
        if let Some(own) = self.inserted.iter_mut().find(|r| r.id == record.id) {
            *own = record.clone();
        } else {
            self.updated.insert(record.id, record.clone());
        }
        Ok(())
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        let shared = Arc::clone(&self.state);
        let mut state = shared
            .lock()
            .map_err(|_| StoreError::LockPoisoned("commit"))?;
        if state.reject_commits {
            return Err(StoreError::Unavailable("commit rejected".into()));
        }

        for row in state.rows.iter_mut() {
            if let Some(update) = self.updated.remove(&row.id) {
                *row = update;
            }
        }
        state.rows.append(&mut self.inserted);
        for id in self.locked.drain(..) {
            state.locked.remove(&id);
        }
        drop(state);

        self.finished = true;
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), StoreError> {
        self.release_locks();
        self.finished = true;
        Ok(())
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.release_locks();
        }
    }
}
