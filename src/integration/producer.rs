use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::BrokerError;
use crate::event::{DomainEvent, EventRegistry, IntegrationEvent};

use super::broker::{BrokerConnector, BrokerMessage, BrokerProducer, EVENT_TYPE_HEADER};

/// Publishes integration events to a broker.
///
/// The body of each message is the event's map form as JSON. The registry
/// name goes in the `event_type` header so consumers can route without
/// parsing the body. The broker connection is opened by
/// [`start`](Self::start) and released by [`stop`](Self::stop).
pub struct IntegrationEventProducer<C: BrokerConnector> {
    connector: C,
    registry: Arc<EventRegistry>,
    producer: RwLock<Option<C::Producer>>,
}

impl<C: BrokerConnector> IntegrationEventProducer<C> {
    pub fn new(connector: C, registry: Arc<EventRegistry>) -> Self {
        Self {
            connector,
            registry,
            producer: RwLock::new(None),
        }
    }

    /// Connect to the broker. A no-op when already started.
    pub async fn start(&self) -> Result<(), BrokerError> {
        let mut producer = self.producer.write().await;
        if producer.is_none() {
            *producer = Some(self.connector.connect_producer().await?);
            tracing::info!("integration producer started");
        }
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), BrokerError> {
        let producer = self.producer.write().await.take();
        if let Some(mut producer) = producer {
            producer.close().await?;
            tracing::info!("integration producer stopped");
        }
        Ok(())
    }

    pub async fn is_started(&self) -> bool {
        self.producer.read().await.is_some()
    }

    /// Encode `event` and send it to `topic`, waiting for the broker.
    pub async fn publish<E: DomainEvent>(&self, topic: &str, event: &E) -> Result<(), BrokerError> {
        let guard = self.producer.read().await;
        let producer = guard.as_ref().ok_or(BrokerError::ProducerNotStarted)?;

        let message = self.encode(topic, event)?;
        let event_type = self.registry.name_of::<E>();
        producer.send_and_wait(message).await?;

        tracing::debug!(topic, event_type = %event_type, "integration event published");
        Ok(())
    }

    /// Publish to the event's own topic.
    pub async fn publish_event<E: IntegrationEvent>(&self, event: &E) -> Result<(), BrokerError> {
        self.publish(E::TOPIC, event).await
    }

    /// The message `publish` would send.
    pub fn encode<E: DomainEvent>(&self, topic: &str, event: &E) -> Result<BrokerMessage, BrokerError> {
        let body = serde_json::to_vec(&event.to_map()?)?;
        Ok(BrokerMessage::new(topic, body)
            .with_header(EVENT_TYPE_HEADER, self.registry.name_of::<E>()))
    }
}
