//! Integration events - the broker bridge between modules and services.
//!
//! ```text
//!  module A                                   module B
//!  DomainEventBus                             IntegrationEventConsumer
//!    └─ RelayToBroker ─▶ IntegrationEventProducer ──▶ broker ──▶ ConsumerRoutes
//!                         body: event map as JSON                 event_type → handlers
//!                         header: event_type = registry name
//! ```
//!
//! Any broker can be plugged in through [`BrokerConnector`]. The bundled
//! [`InMemoryBroker`] has the same group semantics and serves tests and
//! single-process deployments.

mod broker;
mod consumer;
mod in_memory;
mod producer;
mod relay;

pub use broker::{
    BrokerConnector, BrokerMessage, BrokerProducer, BrokerSubscription, EVENT_TYPE_HEADER,
};
pub use consumer::{
    ConsumerHandle, ConsumerRoutes, ConsumerStats, IntegrationEventConsumer, MessageOutcome,
};
pub use in_memory::{InMemoryBroker, InMemoryProducer, InMemorySubscription};
pub use producer::IntegrationEventProducer;
pub use relay::RelayToBroker;
