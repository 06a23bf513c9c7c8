//! Domain event bus - in-process fan-out from event types to handlers.
//!
//! ```text
//! OutboxProcessor ──publish(event)──▶ DomainEventBus
//!                                        │  TypeId → [factory, factory, ...]
//!                                        ▼
//!                               factory() → handler.handle(&event)
//! ```
//!
//! Handlers are bound at startup through [`DomainEventBusBuilder`]. Each
//! binding is a factory, invoked once per publish, so a handler never sees
//! two events.

mod domain;
mod handler;

pub use domain::{DomainEventBus, DomainEventBusBuilder, HandlerFailurePolicy};
pub use handler::EventHandler;

pub(crate) use handler::{erase, HandlerFactory};
