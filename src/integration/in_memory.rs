//! In-memory broker for tests and single-process setups.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::BrokerError;

use super::broker::{BrokerConnector, BrokerMessage, BrokerProducer, BrokerSubscription};

#[derive(Default)]
struct State {
    // Append-only log per topic.
    topics: HashMap<String, Vec<BrokerMessage>>,
    // Next unread position, keyed by (group, topic).
    offsets: HashMap<(String, String), usize>,
}

/// Thread-safe in-memory broker.
///
/// Every topic is an append-only log. Each consumer group keeps one read
/// position per topic, shared by all of its members, so members of a group
/// compete for messages while different groups each see all of them. New
/// groups start reading from the beginning of the log. Clones share state.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<State>>,
    notify: Arc<Notify>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything ever sent to `topic`, oldest first.
    pub fn messages(&self, topic: &str) -> Vec<BrokerMessage> {
        self.lock().topics.get(topic).cloned().unwrap_or_default()
    }

    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.lock().topics.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// How far `group` has read into `topic`.
    pub fn offset(&self, group: &str, topic: &str) -> usize {
        self.lock()
            .offsets
            .get(&(group.to_string(), topic.to_string()))
            .copied()
            .unwrap_or(0)
    }

    fn append(&self, message: BrokerMessage) {
        self.lock()
            .topics
            .entry(message.topic.clone())
            .or_default()
            .push(message);
        self.notify.notify_waiters();
    }

    fn take_next(&self, group: &str, topics: &[String]) -> Option<BrokerMessage> {
        let mut state = self.lock();
        let State { topics: logs, offsets } = &mut *state;
        for topic in topics {
            let Some(log) = logs.get(topic) else {
                continue;
            };
            let offset = offsets
                .entry((group.to_string(), topic.clone()))
                .or_insert(0);
            if let Some(message) = log.get(*offset) {
                *offset += 1;
                return Some(message.clone());
            }
        }
        None
    }

    // Logs and offsets stay consistent even if a holder panicked.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl BrokerConnector for InMemoryBroker {
    type Producer = InMemoryProducer;
    type Subscription = InMemorySubscription;

    async fn connect_producer(&self) -> Result<Self::Producer, BrokerError> {
        Ok(InMemoryProducer {
            broker: self.clone(),
            closed: false,
        })
    }

    async fn subscribe(
        &self,
        topics: &[String],
        group_id: &str,
    ) -> Result<Self::Subscription, BrokerError> {
        if topics.is_empty() {
            return Err(BrokerError::Subscribe {
                topics: Vec::new(),
                reason: "no topics given".into(),
            });
        }
        Ok(InMemorySubscription {
            broker: self.clone(),
            topics: topics.to_vec(),
            group_id: group_id.to_string(),
            closed: false,
        })
    }
}

pub struct InMemoryProducer {
    broker: InMemoryBroker,
    closed: bool,
}

#[async_trait]
impl BrokerProducer for InMemoryProducer {
    async fn send_and_wait(&self, message: BrokerMessage) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        self.broker.append(message);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.closed = true;
        Ok(())
    }
}

/// One group member's view of its topics.
pub struct InMemorySubscription {
    broker: InMemoryBroker,
    topics: Vec<String>,
    group_id: String,
    closed: bool,
}

#[async_trait]
impl BrokerSubscription for InMemorySubscription {
    async fn recv(&mut self) -> Result<Option<BrokerMessage>, BrokerError> {
        loop {
            if self.closed {
                return Ok(None);
            }

            // Register interest before checking so a send in between is not missed.
            let notified = self.broker.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.broker.take_next(&self.group_id, &self.topics) {
                return Ok(Some(message));
            }
            notified.await;
        }
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.closed = true;
        Ok(())
    }
}
