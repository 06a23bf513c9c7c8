use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;

use super::record::{OutboxRecord, OutboxStatus};

/// Durable queue of outbox records, one per bounded module.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    type Transaction: OutboxTransaction;

    /// Open a transaction. Business writes and outbox inserts made through it
    /// commit or roll back together.
    async fn begin(&self) -> Result<Self::Transaction, StoreError>;

    /// Committed records in `status`, oldest first.
    async fn records_by_status(
        &self,
        status: OutboxStatus,
    ) -> Result<Vec<OutboxRecord>, StoreError>;

    async fn count_by_status(&self, status: OutboxStatus) -> Result<usize, StoreError> {
        Ok(self.records_by_status(status).await?.len())
    }
}

/// One open transaction against an [`OutboxStore`].
#[async_trait]
pub trait OutboxTransaction: Send {
    async fn insert(&mut self, record: OutboxRecord) -> Result<(), StoreError>;

    /// Lock and return up to `limit` PENDING records scheduled at or before
    /// `now`, oldest `occurred_at` first.
    ///
    /// Records locked by another open transaction are skipped, never waited
    /// on, so competing processors claim disjoint sets.
    async fn claim_due(
        &mut self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>, StoreError>;

    /// Persist the delivery state of a claimed record.
    async fn save(&mut self, record: &OutboxRecord) -> Result<(), StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: OutboxStore + ?Sized> OutboxStore for Arc<S> {
    type Transaction = S::Transaction;

    async fn begin(&self) -> Result<Self::Transaction, StoreError> {
        (**self).begin().await
    }

    async fn records_by_status(
        &self,
        status: OutboxStatus,
    ) -> Result<Vec<OutboxRecord>, StoreError> {
        (**self).records_by_status(status).await
    }

    async fn count_by_status(&self, status: OutboxStatus) -> Result<usize, StoreError> {
        (**self).count_by_status(status).await
    }
}
