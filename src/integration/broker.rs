use async_trait::async_trait;

use crate::error::BrokerError;

/// Header carrying the registry name of the event in the body.
pub const EVENT_TYPE_HEADER: &str = "event_type";

/// A message as it travels through the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub topic: String,
    pub headers: Vec<(String, Vec<u8>)>,
    pub body: Vec<u8>,
}

impl BrokerMessage {
    pub fn new(topic: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            headers: Vec::new(),
            body,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// First header named `key`.
    pub fn header(&self, key: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    /// The `event_type` header, if present and valid UTF-8.
    pub fn event_type(&self) -> Option<&str> {
        self.header(EVENT_TYPE_HEADER)
            .and_then(|raw| std::str::from_utf8(raw).ok())
    }
}

/// Entry point to a broker: opens producers and group subscriptions.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    type Producer: BrokerProducer;
    type Subscription: BrokerSubscription;

    async fn connect_producer(&self) -> Result<Self::Producer, BrokerError>;

    /// Join `group_id` on `topics`. Members of one group share the messages;
    /// each message goes to exactly one of them.
    async fn subscribe(
        &self,
        topics: &[String],
        group_id: &str,
    ) -> Result<Self::Subscription, BrokerError>;
}

#[async_trait]
pub trait BrokerProducer: Send + Sync {
    /// Send and wait for the broker to acknowledge.
    async fn send_and_wait(&self, message: BrokerMessage) -> Result<(), BrokerError>;

    async fn close(&mut self) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait BrokerSubscription: Send {
    /// Next message for this member. `None` once the subscription is closed.
    async fn recv(&mut self) -> Result<Option<BrokerMessage>, BrokerError>;

    async fn close(&mut self) -> Result<(), BrokerError>;
}
