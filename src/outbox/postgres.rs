//! Postgres outbox store.
//!
//! Rows are claimed with `SELECT ... FOR UPDATE SKIP LOCKED`, so processors
//! on different replicas can share one table. The transaction handed out by
//! [`PgOutboxStore::begin`] is an ordinary `sqlx` transaction: business
//! writes go through [`PgOutboxTransaction::sqlx_transaction`] and commit
//! together with the outbox inserts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::StoreError;

use super::record::{OutboxRecord, OutboxStatus};
use super::store::{OutboxStore, OutboxTransaction};

const COLUMNS: &str = "id, event_type, payload, status, attempts, scheduled_at, \
                       last_error, occurred_at, processed_at";

#[derive(Clone, Debug)]
pub struct PgOutboxStore {
    pool: PgPool,
    table: String,
}

impl PgOutboxStore {
    pub const DEFAULT_TABLE: &'static str = "outbox_records";

    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            table: Self::DEFAULT_TABLE.to_string(),
        }
    }

    /// Use a module-specific table. The name is interpolated into SQL and
    /// must be a trusted identifier.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// DDL for the outbox table and its indexes.
    pub fn create_table_sql(&self) -> Vec<String> {
        let t = &self.table;
        vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {t} (
                    id UUID PRIMARY KEY,
                    event_type VARCHAR(255) NOT NULL,
                    payload JSONB NOT NULL,
                    status VARCHAR(20) NOT NULL DEFAULT 'PENDING',
                    attempts INTEGER NOT NULL DEFAULT 0,
                    scheduled_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    last_error TEXT,
                    occurred_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    processed_at TIMESTAMPTZ
                )"
            ),
            format!("CREATE INDEX IF NOT EXISTS {t}_status_idx ON {t} (status)"),
            format!("CREATE INDEX IF NOT EXISTS {t}_scheduled_at_idx ON {t} (scheduled_at)"),
            format!("CREATE INDEX IF NOT EXISTS {t}_processed_at_idx ON {t} (processed_at)"),
        ]
    }

    /// Create the table if it does not exist yet.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in self.create_table_sql() {
            sqlx::query(&statement).execute(&self.pool).await?;
        }
        tracing::debug!(table = %self.table, "outbox table ready");
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    type Transaction = PgOutboxTransaction;

    async fn begin(&self) -> Result<Self::Transaction, StoreError> {
        Ok(PgOutboxTransaction {
            tx: self.pool.begin().await?,
            table: self.table.clone(),
        })
    }

    async fn records_by_status(
        &self,
        status: OutboxStatus,
    ) -> Result<Vec<OutboxRecord>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM {} WHERE status = $1 ORDER BY occurred_at ASC",
            self.table
        );
        let rows = sqlx::query_as::<_, OutboxRow>(&query)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(OutboxRecord::try_from).collect()
    }

    async fn count_by_status(&self, status: OutboxStatus) -> Result<usize, StoreError> {
        let query = format!("SELECT COUNT(*) FROM {} WHERE status = $1", self.table);
        let count: i64 = sqlx::query_scalar(&query)
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

pub struct PgOutboxTransaction {
    tx: Transaction<'static, Postgres>,
    table: String,
}

impl PgOutboxTransaction {
    /// The underlying transaction, for the operation's own statements.
    pub fn sqlx_transaction(&mut self) -> &mut Transaction<'static, Postgres> {
        &mut self.tx
    }
}

#[async_trait]
impl OutboxTransaction for PgOutboxTransaction {
    async fn insert(&mut self, record: OutboxRecord) -> Result<(), StoreError> {
        let query = format!(
            "INSERT INTO {} ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            self.table
        );
        sqlx::query(&query)
            .bind(record.id)
            .bind(&record.event_type)
            .bind(Value::Object(record.payload))
            .bind(record.status.as_str())
            .bind(attempts_column(record.attempts))
            .bind(record.scheduled_at)
            .bind(&record.last_error)
            .bind(record.occurred_at)
            .bind(record.processed_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn claim_due(
        &mut self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM {} \
             WHERE status = $1 AND scheduled_at <= $2 \
             ORDER BY occurred_at ASC \
             LIMIT $3 \
             FOR UPDATE SKIP LOCKED",
            self.table
        );
        let rows = sqlx::query_as::<_, OutboxRow>(&query)
            .bind(OutboxStatus::Pending.as_str())
            .bind(now)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&mut *self.tx)
            .await?;
        rows.into_iter().map(OutboxRecord::try_from).collect()
    }

    async fn save(&mut self, record: &OutboxRecord) -> Result<(), StoreError> {
        let query = format!(
            "UPDATE {} SET status = $2, attempts = $3, scheduled_at = $4, \
             last_error = $5, processed_at = $6 WHERE id = $1",
            self.table
        );
        sqlx::query(&query)
            .bind(record.id)
            .bind(record.status.as_str())
            .bind(attempts_column(record.attempts))
            .bind(record.scheduled_at)
            .bind(&record.last_error)
            .bind(record.processed_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn attempts_column(attempts: u32) -> i32 {
    i32::try_from(attempts).unwrap_or(i32::MAX)
}

#[derive(FromRow)]
struct OutboxRow {
    id: Uuid,
    event_type: String,
    payload: Value,
    status: String,
    attempts: i32,
    scheduled_at: DateTime<Utc>,
    last_error: Option<String>,
    occurred_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<OutboxRow> for OutboxRecord {
    type Error = StoreError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        let payload = match row.payload {
            Value::Object(map) => map,
            other => {
                return Err(StoreError::Unavailable(format!(
                    "outbox row {} has a non-object payload: {other}",
                    row.id
                )))
            }
        };
        Ok(OutboxRecord {
            id: row.id,
            event_type: row.event_type,
            payload,
            status: row.status.parse()?,
            attempts: u32::try_from(row.attempts).unwrap_or(0),
            scheduled_at: row.scheduled_at,
            last_error: row.last_error,
            occurred_at: row.occurred_at,
            processed_at: row.processed_at,
        })
    }
}
