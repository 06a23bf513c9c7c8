//! Startup and shutdown of one bounded module's background work.

use std::sync::Arc;

use crate::config::ConsumerConfig;
use crate::error::BrokerError;
use crate::integration::{
    BrokerConnector, ConsumerHandle, ConsumerStats, InMemoryBroker, IntegrationEventConsumer,
    IntegrationEventProducer,
};
use crate::outbox::{OutboxProcessor, OutboxStore, ProcessorHandle, ProcessorStats};

/// Totals reported when a module shuts down.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ModuleStats {
    pub processor: ProcessorStats,
    pub consumer: Option<ConsumerStats>,
}

/// Wiring for one module: its outbox processor and, optionally, a broker
/// producer and an integration consumer.
///
/// ## Example
///
/// ```ignore
/// let running = ModuleRuntime::new("users", processor)
///     .with_producer(producer)
///     .with_consumer(consumer, config.consumer)
///     .start()
///     .await?;
/// // ... serve requests ...
/// let stats = running.stop().await?;
/// ```
pub struct ModuleRuntime<S, C: BrokerConnector = InMemoryBroker> {
    name: &'static str,
    processor: Arc<OutboxProcessor<S>>,
    producer: Option<Arc<IntegrationEventProducer<C>>>,
    consumer: Option<(Arc<IntegrationEventConsumer<C>>, ConsumerConfig)>,
}

impl<S, C> ModuleRuntime<S, C>
where
    S: OutboxStore + 'static,
    C: BrokerConnector + 'static,
{
    pub fn new(name: &'static str, processor: Arc<OutboxProcessor<S>>) -> Self {
        Self {
            name,
            processor,
            producer: None,
            consumer: None,
        }
    }

    pub fn with_producer(mut self, producer: Arc<IntegrationEventProducer<C>>) -> Self {
        self.producer = Some(producer);
        self
    }

    pub fn with_consumer(
        mut self,
        consumer: Arc<IntegrationEventConsumer<C>>,
        config: ConsumerConfig,
    ) -> Self {
        self.consumer = Some((consumer, config));
        self
    }

    /// Start the producer, then the consumer loop, then the processor loop.
    pub async fn start(self) -> Result<RunningModule<C>, BrokerError> {
        if let Some(producer) = &self.producer {
            producer.start().await?;
        }

        let consumer = match &self.consumer {
            Some((consumer, config)) => match Self::start_consumer(consumer, config).await {
                Ok(handle) => Some((Arc::clone(consumer), handle)),
                Err(err) => {
                    if let Some(producer) = &self.producer {
                        producer.stop().await?;
                    }
                    return Err(err);
                }
            },
            None => None,
        };

        let processor = Arc::clone(&self.processor).spawn();
        tracing::info!(module = self.name, "module started");

        Ok(RunningModule {
            name: self.name,
            processor,
            consumer,
            producer: self.producer,
        })
    }

    async fn start_consumer(
        consumer: &Arc<IntegrationEventConsumer<C>>,
        config: &ConsumerConfig,
    ) -> Result<ConsumerHandle, BrokerError> {
        consumer.start(&config.topics, &config.group_id).await?;
        Arc::clone(consumer).spawn().await
    }
}

/// A started module. Dropping it leaves the tasks running; call
/// [`stop`](RunningModule::stop).
pub struct RunningModule<C: BrokerConnector = InMemoryBroker> {
    name: &'static str,
    processor: ProcessorHandle,
    consumer: Option<(Arc<IntegrationEventConsumer<C>>, ConsumerHandle)>,
    producer: Option<Arc<IntegrationEventProducer<C>>>,
}

impl<C: BrokerConnector> RunningModule<C> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop the consumer, then the processor, then the producer. Each loop
    /// finishes the message or batch it is working on first.
    pub async fn stop(self) -> Result<ModuleStats, BrokerError> {
        let consumer = match self.consumer {
            Some((consumer, handle)) => {
                let stats = handle.stop().await;
                consumer.stop().await?;
                Some(stats)
            }
            None => None,
        };

        let processor = self.processor.stop().await;

        if let Some(producer) = &self.producer {
            producer.stop().await?;
        }

        tracing::info!(
            module = self.name,
            processed = processor.processed,
            dead_lettered = processor.dead_lettered,
            "module stopped"
        );
        Ok(ModuleStats {
            processor,
            consumer,
        })
    }
}
