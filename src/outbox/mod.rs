//! Outbox - durable staging of domain events and their delivery.
//!
//! The outbox has two phases:
//! 1. **Write phase** ([`UnitOfWork`]) - events staged on aggregates become
//!    PENDING rows in the same transaction as the business change.
//! 2. **Delivery phase** ([`OutboxProcessor`]) - due rows are claimed,
//!    dispatched to the domain event bus and marked PROCESSED, rescheduled
//!    with backoff, or dead-lettered as FAILED.
//!
//! ```text
//!            PENDING ──dispatch ok──▶ PROCESSED
//!             │    ▲
//!      failure│    │attempts < max
//!             ▼    │(scheduled_at = now + 2^attempts * base)
//!          attempts += 1
//!             │
//!             └──attempts >= max──▶ FAILED
//! ```

mod in_memory;
#[cfg(feature = "postgres")]
mod postgres;
mod processor;
mod record;
mod store;
mod unit_of_work;

pub use in_memory::{InMemoryOutboxStore, InMemoryTransaction};
#[cfg(feature = "postgres")]
pub use postgres::{PgOutboxStore, PgOutboxTransaction};
pub use processor::{BatchReport, OutboxProcessor, ProcessorHandle, ProcessorStats};
pub use record::{FailureOutcome, OutboxRecord, OutboxStatus, RetryPolicy};
pub use store::{OutboxStore, OutboxTransaction};
pub use unit_of_work::UnitOfWork;
