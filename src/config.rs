use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::outbox::RetryPolicy;

/// Outbox processor settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// Records claimed per batch.
    pub batch_size: usize,
    /// Sleep between polls when the previous batch was empty.
    pub poll_interval_ms: u64,
    /// Failed attempts before a record is dead-lettered.
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
    /// Upper bound on one dispatch. `0` disables the limit.
    pub dispatch_timeout_ms: u64,
}

impl OutboxConfig {
    pub const DEFAULT_BATCH_SIZE: usize = 20;
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
    pub const DEFAULT_DISPATCH_TIMEOUT_MS: u64 = 30_000;

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn dispatch_timeout(&self) -> Option<Duration> {
        (self.dispatch_timeout_ms > 0).then(|| Duration::from_millis(self.dispatch_timeout_ms))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff_base: Duration::from_secs(self.backoff_base_secs),
        }
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            batch_size: Self::DEFAULT_BATCH_SIZE,
            poll_interval_ms: Self::DEFAULT_POLL_INTERVAL_MS,
            max_attempts: RetryPolicy::DEFAULT_MAX_ATTEMPTS,
            backoff_base_secs: RetryPolicy::DEFAULT_BACKOFF_BASE.as_secs(),
            dispatch_timeout_ms: Self::DEFAULT_DISPATCH_TIMEOUT_MS,
        }
    }
}

/// Integration consumer settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Consumers sharing a group split the messages between them.
    pub group_id: String,
    pub topics: Vec<String>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group_id: "event-relay".into(),
            topics: Vec::new(),
        }
    }
}

/// Settings for one module's outbox and consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub outbox: OutboxConfig,
    pub consumer: ConsumerConfig,
}

impl RelayConfig {
    /// Load from the process environment, after reading `.env` if present.
    ///
    /// | Env Var                            | Default       |
    /// |------------------------------------|---------------|
    /// | `RELAY_OUTBOX_BATCH_SIZE`          | `20`          |
    /// | `RELAY_OUTBOX_POLL_INTERVAL_MS`    | `500`         |
    /// | `RELAY_OUTBOX_MAX_ATTEMPTS`        | `5`           |
    /// | `RELAY_OUTBOX_BACKOFF_BASE_SECS`   | `10`          |
    /// | `RELAY_OUTBOX_DISPATCH_TIMEOUT_MS` | `30000`       |
    /// | `RELAY_CONSUMER_GROUP`             | `event-relay` |
    /// | `RELAY_CONSUMER_TOPICS`            | (none)        |
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = RelayConfig::default();

        let outbox = OutboxConfig {
            batch_size: parse_or(&lookup, "RELAY_OUTBOX_BATCH_SIZE", defaults.outbox.batch_size)?,
            poll_interval_ms: parse_or(
                &lookup,
                "RELAY_OUTBOX_POLL_INTERVAL_MS",
                defaults.outbox.poll_interval_ms,
            )?,
            max_attempts: parse_or(
                &lookup,
                "RELAY_OUTBOX_MAX_ATTEMPTS",
                defaults.outbox.max_attempts,
            )?,
            backoff_base_secs: parse_or(
                &lookup,
                "RELAY_OUTBOX_BACKOFF_BASE_SECS",
                defaults.outbox.backoff_base_secs,
            )?,
            dispatch_timeout_ms: parse_or(
                &lookup,
                "RELAY_OUTBOX_DISPATCH_TIMEOUT_MS",
                defaults.outbox.dispatch_timeout_ms,
            )?,
        };

        if outbox.batch_size == 0 {
            return Err(ConfigError {
                key: "RELAY_OUTBOX_BATCH_SIZE",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        if outbox.max_attempts == 0 {
            return Err(ConfigError {
                key: "RELAY_OUTBOX_MAX_ATTEMPTS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        let group_id = lookup("RELAY_CONSUMER_GROUP")
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty())
            .unwrap_or(defaults.consumer.group_id);

        let topics = lookup("RELAY_CONSUMER_TOPICS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            outbox,
            consumer: ConsumerConfig { group_id, topics },
        })
    }
}

fn parse_or<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|err: T::Err| ConfigError {
            key,
            value: raw.clone(),
            reason: err.to_string(),
        }),
    }
}
