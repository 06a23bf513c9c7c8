use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EventError;
use crate::event::{short_type_name, AnyEvent, DomainEvent};

/// Reacts to one event type.
///
/// Handlers are built fresh for every dispatch by the factory they were
/// subscribed with, so they may keep per-dispatch state in `self`.
#[async_trait]
pub trait EventHandler<E: DomainEvent>: Send + Sync {
    async fn handle(&self, event: &E) -> anyhow::Result<()>;

    /// Label used in logs and failure reports.
    fn name(&self) -> &'static str {
        short_type_name::<Self>()
    }
}

#[async_trait]
impl<E: DomainEvent, H: EventHandler<E> + ?Sized> EventHandler<E> for Arc<H> {
    async fn handle(&self, event: &E) -> anyhow::Result<()> {
        (**self).handle(event).await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Handler with its event type erased, as stored in dispatch tables.
#[async_trait]
pub(crate) trait ErasedHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &dyn AnyEvent) -> anyhow::Result<()>;
}

struct Typed<E, H> {
    handler: H,
    _event: PhantomData<fn(&E)>,
}

#[async_trait]
impl<E, H> ErasedHandler for Typed<E, H>
where
    E: DomainEvent,
    H: EventHandler<E>,
{
    fn name(&self) -> &'static str {
        self.handler.name()
    }

    async fn handle(&self, event: &dyn AnyEvent) -> anyhow::Result<()> {
        let typed = event
            .downcast_ref::<E>()
            .ok_or_else(|| EventError::TypeMismatch {
                expected: short_type_name::<E>(),
                actual: event.type_name(),
            })?;
        self.handler.handle(typed).await
    }
}

/// Builds a new handler for each dispatch.
pub(crate) type HandlerFactory = Arc<dyn Fn() -> Box<dyn ErasedHandler> + Send + Sync>;

pub(crate) fn erase<E, H, F>(make: F) -> HandlerFactory
where
    E: DomainEvent,
    H: EventHandler<E> + 'static,
    F: Fn() -> H + Send + Sync + 'static,
{
    Arc::new(move || {
        Box::new(Typed::<E, H> {
            handler: make(),
            _event: PhantomData,
        })
    })
}
