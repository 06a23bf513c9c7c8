use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;

use crate::error::{DispatchError, HandlerFailure};
use crate::event::{AnyEvent, DomainEvent};

use super::handler::{erase, EventHandler, HandlerFactory};

/// What a publish does when a handler fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HandlerFailurePolicy {
    /// Log the failure and report success. Sibling handlers still run.
    #[default]
    BestEffort,
    /// Run every handler, then report all failures together so the outbox
    /// row is retried.
    Propagate,
}

/// In-process dispatcher from event types to handler factories.
///
/// The subscriber table is fixed when the bus is built and needs no locking
/// afterwards.
///
/// ## Example
///
/// ```ignore
/// let bus = DomainEventBus::builder()
///     .subscribe::<AccountRegistered, _, _>(|| SendVerificationEmail::new(mailer.clone()))
///     .subscribe::<AccountRegistered, _, _>(|| CreateDefaultSettings)
///     .failure_policy(HandlerFailurePolicy::Propagate)
///     .build();
///
/// bus.publish_event(&AccountRegistered { account_id: "a-1".into() }).await?;
/// ```
pub struct DomainEventBus {
    handlers: HashMap<TypeId, Vec<HandlerFactory>>,
    policy: HandlerFailurePolicy,
}

impl DomainEventBus {
    pub fn builder() -> DomainEventBusBuilder {
        DomainEventBusBuilder::default()
    }

    pub fn failure_policy(&self) -> HandlerFailurePolicy {
        self.policy
    }

    pub fn subscriber_count<E: DomainEvent>(&self) -> usize {
        self.handlers.get(&TypeId::of::<E>()).map_or(0, Vec::len)
    }

    /// Dispatch to every handler bound to the event's type, in subscription
    /// order, one after another.
    pub async fn publish(&self, event: &dyn AnyEvent) -> Result<(), DispatchError> {
        let Some(factories) = self.handlers.get(&event.event_type_id()) else {
            tracing::debug!(event = event.type_name(), "no handlers bound");
            return Ok(());
        };

        let mut failures = Vec::new();
        for factory in factories {
            let handler = factory();
            if let Err(err) = handler.handle(event).await {
                let message = format!("{err:#}");
                tracing::error!(
                    event = event.type_name(),
                    handler = handler.name(),
                    error = %message,
                    "event handler failed"
                );
                failures.push(HandlerFailure {
                    handler: handler.name(),
                    message,
                });
            }
        }

        match self.policy {
            HandlerFailurePolicy::Propagate if !failures.is_empty() => {
                Err(DispatchError::HandlersFailed {
                    event: event.type_name().to_string(),
                    failures,
                })
            }
            _ => Ok(()),
        }
    }

    pub async fn publish_event<E: DomainEvent>(&self, event: &E) -> Result<(), DispatchError> {
        self.publish(event).await
    }
}

impl fmt::Debug for DomainEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainEventBus")
            .field("event_types", &self.handlers.len())
            .field("policy", &self.policy)
            .finish()
    }
}

#[derive(Default)]
pub struct DomainEventBusBuilder {
    handlers: HashMap<TypeId, Vec<HandlerFactory>>,
    policy: HandlerFailurePolicy,
}

impl DomainEventBusBuilder {
    /// Bind a handler factory to `E`. The factory runs once per publish.
    pub fn subscribe<E, H, F>(mut self, make: F) -> Self
    where
        E: DomainEvent,
        H: EventHandler<E> + 'static,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.handlers
            .entry(TypeId::of::<E>())
            .or_default()
            .push(erase::<E, H, F>(make));
        self
    }

    pub fn failure_policy(mut self, policy: HandlerFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> DomainEventBus {
        DomainEventBus {
            handlers: self.handlers,
            policy: self.policy,
        }
    }
}
