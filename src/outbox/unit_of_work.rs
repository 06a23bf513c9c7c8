use std::sync::Arc;

use crate::aggregate::{Aggregate, StagedEvents};
use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use crate::event::{EventRegistry, SharedEvent};

use super::record::OutboxRecord;
use super::store::{OutboxStore, OutboxTransaction};

/// Scope of one business operation.
///
/// The unit of work owns the transaction the operation writes through and
/// the list of aggregates it touched. [`commit`](UnitOfWork::commit) turns
/// every event staged on those aggregates into a PENDING outbox row inside
/// the same transaction, and only removes the events from the aggregates
/// once the transaction has committed.
///
/// ## Example
///
/// ```ignore
/// let mut uow = UnitOfWork::new(store.clone(), registry.clone());
/// uow.begin().await?;
///
/// let account = Account::register("a-1", "a@example.com");
/// accounts.insert(uow.transaction()?, &account).await?;
/// uow.track(&account);
///
/// uow.commit().await?;
/// ```
pub struct UnitOfWork<S: OutboxStore> {
    store: S,
    registry: Arc<EventRegistry>,
    clock: Arc<dyn Clock>,
    transaction: Option<S::Transaction>,
    tracked: Vec<StagedEvents>,
}

impl<S: OutboxStore> UnitOfWork<S> {
    pub fn new(store: S, registry: Arc<EventRegistry>) -> Self {
        Self {
            store,
            registry,
            clock: Arc::new(SystemClock),
            transaction: None,
            tracked: Vec::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Open the transaction. A no-op if one is already open.
    pub async fn begin(&mut self) -> Result<(), StoreError> {
        if self.transaction.is_none() {
            self.transaction = Some(self.store.begin().await?);
        }
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.transaction.is_some()
    }

    /// The open transaction, for the operation's own writes.
    pub fn transaction(&mut self) -> Result<&mut S::Transaction, StoreError> {
        self.transaction
            .as_mut()
            .ok_or(StoreError::SessionNotInitialized)
    }

    /// Include the aggregate's staged events in the next commit. Tracking the
    /// same aggregate twice has no further effect.
    pub fn track<A: Aggregate + ?Sized>(&mut self, aggregate: &A) {
        let staged = aggregate.pending_events().staged();
        if !self.tracked.iter().any(|t| t.same_queue(&staged)) {
            self.tracked.push(staged);
        }
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    /// Write one outbox row per staged event and commit.
    ///
    /// Returns the number of rows written. If anything fails the transaction
    /// is rolled back and every event stays staged on its aggregate.
    pub async fn commit(&mut self) -> Result<usize, StoreError> {
        let mut tx = self
            .transaction
            .take()
            .ok_or(StoreError::SessionNotInitialized)?;

        let batches: Vec<(StagedEvents, Vec<SharedEvent>)> = self
            .tracked
            .iter()
            .map(|staged| (staged.clone(), staged.snapshot()))
            .collect();

        let written = match self.write_records(&mut tx, &batches).await {
            Ok(written) => written,
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "rollback after failed outbox write failed");
                }
                return Err(err);
            }
        };

        if let Err(err) = tx.commit().await {
            tracing::warn!(error = %err, records = written, "unit of work commit failed");
            return Err(err);
        }

        for (staged, events) in &batches {
            staged.discard(events);
        }
        self.tracked.clear();

        tracing::debug!(records = written, "unit of work committed");
        Ok(written)
    }

    /// Abort the transaction. Staged events stay on their aggregates.
    pub async fn rollback(&mut self) -> Result<(), StoreError> {
        self.tracked.clear();
        match self.transaction.take() {
            Some(tx) => tx.rollback().await,
            None => Ok(()),
        }
    }

    async fn write_records(
        &self,
        tx: &mut S::Transaction,
        batches: &[(StagedEvents, Vec<SharedEvent>)],
    ) -> Result<usize, StoreError> {
        let mut written = 0;
        for (_, events) in batches {
            for event in events {
                let name = self.registry.name_of_event(event.as_ref());
                let payload = event.encode()?;
                tx.insert(OutboxRecord::pending(name, payload, self.clock.now()))
                    .await?;
                written += 1;
            }
        }
        Ok(written)
    }
}
