use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use tokio_util::sync::CancellationToken;

use crate::bus::{erase, EventHandler, HandlerFactory};
use crate::error::BrokerError;
use crate::event::{decode_as, DecodeFn, DomainEvent, EventMap, EventRegistry, SharedEvent};
use crate::task::{BackgroundTask, TokenSlot};

use super::broker::{BrokerConnector, BrokerMessage, BrokerSubscription};

const RECV_ERROR_BACKOFF: Duration = Duration::from_secs(1);

struct Route {
    decode: DecodeFn,
    handlers: Vec<HandlerFactory>,
}

/// Routing table from `event_type` header values to handler factories.
///
/// Built once at startup. Each route is keyed by the registry name of its
/// event type and decodes bodies straight into that type, so a routed type
/// need not be registered for messages to reach its handlers.
pub struct ConsumerRoutes {
    registry: Arc<EventRegistry>,
    routes: HashMap<String, Route>,
}

impl ConsumerRoutes {
    pub fn new(registry: Arc<EventRegistry>) -> Self {
        Self {
            registry,
            routes: HashMap::new(),
        }
    }

    /// Handle messages carrying `E` with a fresh handler from `make`.
    pub fn route<E, H, F>(mut self, make: F) -> Self
    where
        E: DomainEvent,
        H: EventHandler<E> + 'static,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.routes
            .entry(self.registry.name_of::<E>())
            .or_insert_with(|| Route {
                decode: decode_as::<E>,
                handlers: Vec::new(),
            })
            .handlers
            .push(erase::<E, H, F>(make));
        self
    }

    pub fn handles(&self, event_type: &str) -> bool {
        self.routes.contains_key(event_type)
    }

    fn get(&self, event_type: &str) -> Option<&Route> {
        self.routes.get(event_type)
    }
}

impl Route {
    fn decode(&self, body: &[u8]) -> Result<SharedEvent, BrokerError> {
        let map: EventMap = serde_json::from_slice(body)?;
        Ok((self.decode)(map)?)
    }
}

/// What happened to one received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// No route for its `event_type`, or no header at all.
    Skipped,
    Handled,
    /// The body did not decode or a handler failed.
    Failed,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: usize,
    pub handled: usize,
    pub skipped: usize,
    pub failed: usize,
    pub receive_errors: usize,
}

/// Handle to a spawned consumer loop.
pub type ConsumerHandle = BackgroundTask<ConsumerStats>;

/// Consumes integration events from a broker group and runs their handlers.
///
/// Unknown event types are skipped for forward compatibility. Failures are
/// logged per message; the loop itself only ends on [`stop`](Self::stop)
/// or when the broker closes the subscription.
pub struct IntegrationEventConsumer<C: BrokerConnector> {
    connector: C,
    routes: ConsumerRoutes,
    subscription: Mutex<Option<C::Subscription>>,
    cancel: TokenSlot,
}

impl<C: BrokerConnector> IntegrationEventConsumer<C> {
    pub fn new(connector: C, routes: ConsumerRoutes) -> Self {
        Self {
            connector,
            routes,
            subscription: Mutex::new(None),
            cancel: TokenSlot::default(),
        }
    }

    pub fn routes(&self) -> &ConsumerRoutes {
        &self.routes
    }

    /// Join `group_id` on `topics`.
    pub async fn start(&self, topics: &[String], group_id: &str) -> Result<(), BrokerError> {
        let subscription = self.connector.subscribe(topics, group_id).await?;
        let previous = self.subscription.lock().await.replace(subscription);
        if let Some(mut previous) = previous {
            previous.close().await?;
        }
        tracing::info!(?topics, group_id, "integration consumer started");
        Ok(())
    }

    pub async fn is_started(&self) -> bool {
        self.subscription.lock().await.is_some()
    }

    /// Receive and handle messages until stopped.
    pub async fn run_forever(&self) -> Result<ConsumerStats, BrokerError> {
        let subscription = self.take_subscription().await?;
        Ok(self.run_with(subscription, self.cancel.arm()).await)
    }

    /// End the loop and release the broker connection.
    pub async fn stop(&self) -> Result<(), BrokerError> {
        self.cancel.cancel();
        let idle = self.subscription.lock().await.take();
        if let Some(mut subscription) = idle {
            subscription.close().await?;
        }
        Ok(())
    }

    /// Route one message to its handlers.
    pub async fn handle_message(&self, message: &BrokerMessage) -> MessageOutcome {
        let Some(event_type) = message.event_type() else {
            tracing::debug!(topic = %message.topic, "message without event_type header skipped");
            return MessageOutcome::Skipped;
        };
        let Some(route) = self.routes.get(event_type) else {
            tracing::debug!(topic = %message.topic, event_type, "unrouted event type skipped");
            return MessageOutcome::Skipped;
        };

        let event = match route.decode(&message.body) {
            Ok(event) => event,
            Err(err) => {
                tracing::error!(
                    topic = %message.topic,
                    event_type,
                    error = %err,
                    "integration event could not be decoded"
                );
                return MessageOutcome::Failed;
            }
        };

        let mut outcome = MessageOutcome::Handled;
        for factory in &route.handlers {
            let handler = factory();
            if let Err(err) = handler.handle(event.as_ref()).await {
                tracing::error!(
                    topic = %message.topic,
                    event_type,
                    handler = handler.name(),
                    error = %format!("{err:#}"),
                    "integration event handler failed"
                );
                outcome = MessageOutcome::Failed;
            }
        }
        outcome
    }

    async fn take_subscription(&self) -> Result<C::Subscription, BrokerError> {
        self.subscription
            .lock()
            .await
            .take()
            .ok_or(BrokerError::ConsumerNotStarted)
    }

    async fn run_with(
        &self,
        mut subscription: C::Subscription,
        cancel: CancellationToken,
    ) -> ConsumerStats {
        let mut stats = ConsumerStats::default();

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = subscription.recv() => next,
            };

            match next {
                Ok(Some(message)) => {
                    stats.received += 1;
                    match self.handle_message(&message).await {
                        MessageOutcome::Skipped => stats.skipped += 1,
                        MessageOutcome::Handled => stats.handled += 1,
                        MessageOutcome::Failed => stats.failed += 1,
                    }
                }
                Ok(None) | Err(BrokerError::Closed) => break,
                Err(err) => {
                    stats.receive_errors += 1;
                    tracing::error!(error = %err, "integration consumer receive failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RECV_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        if let Err(err) = subscription.close().await {
            tracing::warn!(error = %err, "closing integration subscription failed");
        }
        tracing::info!(
            received = stats.received,
            handled = stats.handled,
            skipped = stats.skipped,
            failed = stats.failed,
            "integration consumer stopped"
        );
        stats
    }
}

impl<C: BrokerConnector + 'static> IntegrationEventConsumer<C> {
    /// Run the loop on the tokio runtime. Requires [`start`](Self::start).
    pub async fn spawn(self: Arc<Self>) -> Result<ConsumerHandle, BrokerError> {
        let subscription = self.take_subscription().await?;
        let cancel = self.cancel.arm();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { self.run_with(subscription, token).await });
        Ok(BackgroundTask::new("integration-consumer", cancel, handle))
    }
}
