use std::sync::Arc;

use async_trait::async_trait;

use crate::bus::EventHandler;
use crate::event::{DomainEvent, IntegrationEvent};

use super::broker::BrokerConnector;
use super::producer::IntegrationEventProducer;

/// Domain event handler that re-publishes an event on the broker.
///
/// `map` builds the integration event from the domain event; the result is
/// sent to its own topic. A send failure fails the handler, so under
/// [`HandlerFailurePolicy::Propagate`](crate::HandlerFailurePolicy) the
/// outbox row is retried.
///
/// ```ignore
/// let relay = RelayToBroker::new(producer.clone(), |e: &AccountRegistered| {
///     AccountRegisteredIntegration { account_id: e.account_id.clone(), email: e.email.clone() }
/// });
/// let bus = DomainEventBus::builder()
///     .subscribe::<AccountRegistered, _, _>(relay.factory())
///     .build();
/// ```
pub struct RelayToBroker<D, I, C: BrokerConnector> {
    producer: Arc<IntegrationEventProducer<C>>,
    map: Arc<dyn Fn(&D) -> I + Send + Sync>,
}

impl<D, I, C> RelayToBroker<D, I, C>
where
    D: DomainEvent,
    I: IntegrationEvent,
    C: BrokerConnector + 'static,
{
    pub fn new<F>(producer: Arc<IntegrationEventProducer<C>>, map: F) -> Self
    where
        F: Fn(&D) -> I + Send + Sync + 'static,
    {
        Self {
            producer,
            map: Arc::new(map),
        }
    }

    /// Factory for [`DomainEventBusBuilder::subscribe`](crate::DomainEventBusBuilder::subscribe).
    pub fn factory(self) -> impl Fn() -> Self + Send + Sync + 'static {
        move || self.clone()
    }
}

impl<D, I, C: BrokerConnector> Clone for RelayToBroker<D, I, C> {
    fn clone(&self) -> Self {
        Self {
            producer: Arc::clone(&self.producer),
            map: Arc::clone(&self.map),
        }
    }
}

#[async_trait]
impl<D, I, C> EventHandler<D> for RelayToBroker<D, I, C>
where
    D: DomainEvent,
    I: IntegrationEvent,
    C: BrokerConnector + 'static,
{
    async fn handle(&self, event: &D) -> anyhow::Result<()> {
        let integration = (self.map)(event);
        self.producer.publish_event(&integration).await?;
        Ok(())
    }
}
