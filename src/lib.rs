//! Transactional event delivery for modular services.
//!
//! Aggregates stage domain events, a [`UnitOfWork`] writes them to an
//! outbox in the same transaction as the business change, and an
//! [`OutboxProcessor`] delivers them to in-process handlers through the
//! [`DomainEventBus`] with retry, backoff and dead-lettering. Events that
//! cross process boundaries travel through an [`IntegrationEventProducer`]
//! and [`IntegrationEventConsumer`].

pub mod aggregate;
pub mod bus;
mod clock;
mod config;
mod error;
pub mod event;
pub mod integration;
pub mod outbox;
mod runtime;
mod task;

pub use aggregate::{Aggregate, PendingEvents};
pub use bus::{DomainEventBus, DomainEventBusBuilder, EventHandler, HandlerFailurePolicy};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConsumerConfig, OutboxConfig, RelayConfig};
pub use error::{
    BrokerError, ConfigError, DispatchError, EventError, HandlerFailure, StoreError,
};
pub use event::{
    short_type_name, AnyEvent, DomainEvent, EventMap, EventRegistry, EventRegistryBuilder,
    EventType, IntegrationEvent, SharedEvent,
};
pub use integration::{
    BrokerConnector, BrokerMessage, BrokerProducer, BrokerSubscription, ConsumerHandle,
    ConsumerRoutes, ConsumerStats, InMemoryBroker, IntegrationEventConsumer,
    IntegrationEventProducer, MessageOutcome, RelayToBroker, EVENT_TYPE_HEADER,
};
#[cfg(feature = "postgres")]
pub use outbox::{PgOutboxStore, PgOutboxTransaction};
pub use outbox::{
    BatchReport, FailureOutcome, InMemoryOutboxStore, OutboxProcessor, OutboxRecord,
    OutboxStatus, OutboxStore, OutboxTransaction, ProcessorHandle, ProcessorStats, RetryPolicy,
    UnitOfWork,
};
pub use runtime::{ModuleRuntime, ModuleStats, RunningModule};
pub use task::BackgroundTask;
