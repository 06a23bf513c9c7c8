use std::time::Duration;

use thiserror::Error;

/// Errors raised while naming, encoding or reconstructing events.
#[derive(Debug, Error)]
pub enum EventError {
    /// The name was never registered. Usually a version mismatch between
    /// the producing and consuming side.
    #[error("event {name} is not registered")]
    Reconstruction { name: String },

    #[error("event {name} could not be serialized: {source}")]
    Serialization {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("event payload for {name} is invalid: {source}")]
    Deserialization {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    /// Two different types were registered under the same name.
    #[error("event name {name} is registered for both {existing} and {conflicting}")]
    NameConflict {
        name: String,
        existing: &'static str,
        conflicting: &'static str,
    },

    #[error("expected event {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
}

/// Errors from an outbox store or its transactions.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session not initialized")]
    SessionNotInitialized,

    #[error("store lock poisoned during {0}")]
    LockPoisoned(&'static str),

    #[error("invalid outbox status {0:?}")]
    InvalidStatus(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Event(#[from] EventError),

    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Errors from the message broker bridge.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("producer not started")]
    ProducerNotStarted,

    #[error("consumer not started")]
    ConsumerNotStarted,

    #[error("failed to send to topic {topic}: {reason}")]
    Send { topic: String, reason: String },

    #[error("failed to subscribe to {topics:?}: {reason}")]
    Subscribe { topics: Vec<String>, reason: String },

    #[error("broker connection closed")]
    Closed,

    #[error(transparent)]
    Event(#[from] EventError),

    #[error("message body is not valid JSON: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Failure of one handler during a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    pub handler: &'static str,
    pub message: String,
}

/// Errors returned from a domain event dispatch.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{} handler(s) failed for {event}: {}", .failures.len(), summarize(.failures))]
    HandlersFailed {
        event: String,
        failures: Vec<HandlerFailure>,
    },

    #[error("dispatch timed out after {0:?}")]
    TimedOut(Duration),

    #[error(transparent)]
    Event(#[from] EventError),
}

fn summarize(failures: &[HandlerFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.handler, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Invalid configuration value.
#[derive(Debug, Error)]
#[error("invalid value {value:?} for {key}: {reason}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}
