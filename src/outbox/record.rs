use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::event::EventMap;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Processed,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Processed => "PROCESSED",
            OutboxStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OutboxStatus::Pending)
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OutboxStatus::Pending),
            "PROCESSED" => Ok(OutboxStatus::Processed),
            "FAILED" => Ok(OutboxStatus::Failed),
            other => Err(StoreError::InvalidStatus(other.to_string())),
        }
    }
}

/// How failed dispatches are rescheduled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
    pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(10);

    /// Delay before the next try after `attempts` failures: `2^attempts * base`.
    pub fn backoff(&self, attempts: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempts))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            backoff_base: Self::DEFAULT_BACKOFF_BASE,
        }
    }
}

/// What a failed dispatch did to a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Still pending, eligible again after `delay`.
    Rescheduled { delay: Duration },
    /// Moved to FAILED; never claimed again.
    DeadLettered,
    /// The record was already terminal and was left untouched.
    Ignored,
}

/// Durable queue entry for one staged event.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct OutboxRecord {
    pub id: Uuid,
    pub event_type: String,
    pub payload: EventMap,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub scheduled_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    /// A fresh PENDING record, eligible immediately.
    pub fn pending(event_type: impl Into<String>, payload: EventMap, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            payload,
            status: OutboxStatus::Pending,
            attempts: 0,
            scheduled_at: now,
            last_error: None,
            occurred_at: now,
            processed_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == OutboxStatus::Pending
    }

    pub fn is_processed(&self) -> bool {
        self.status == OutboxStatus::Processed
    }

    pub fn is_failed(&self) -> bool {
        self.status == OutboxStatus::Failed
    }

    /// Pending and scheduled at or before `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.scheduled_at <= now
    }

    /// PENDING -> PROCESSED. Returns false for terminal records.
    pub fn mark_processed(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.status = OutboxStatus::Processed;
        self.processed_at = Some(now);
        true
    }

    /// Count a failed dispatch and either reschedule or dead-letter.
    pub fn record_failure(
        &mut self,
        error: impl Into<String>,
        now: DateTime<Utc>,
        policy: &RetryPolicy,
    ) -> FailureOutcome {
        if !self.is_pending() {
            return FailureOutcome::Ignored;
        }

        self.attempts = self.attempts.saturating_add(1);
        self.last_error = Some(error.into());

        if self.attempts >= policy.max_attempts {
            self.status = OutboxStatus::Failed;
            return FailureOutcome::DeadLettered;
        }

        let delay = policy.backoff(self.attempts);
        self.scheduled_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        FailureOutcome::Rescheduled { delay }
    }
}
