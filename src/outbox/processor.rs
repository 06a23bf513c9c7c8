use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::bus::DomainEventBus;
use crate::clock::{Clock, SystemClock};
use crate::config::OutboxConfig;
use crate::error::{DispatchError, StoreError};
use crate::event::EventRegistry;
use crate::task::{BackgroundTask, TokenSlot};

use super::record::{FailureOutcome, OutboxRecord};
use super::store::{OutboxStore, OutboxTransaction};

/// Result of one claimed batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub claimed: usize,
    pub processed: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

impl BatchReport {
    pub fn is_empty(&self) -> bool {
        self.claimed == 0
    }
}

/// Totals over the lifetime of a processor loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorStats {
    pub polls: usize,
    pub batches: usize,
    pub processed: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    pub store_errors: usize,
}

impl ProcessorStats {
    fn absorb(&mut self, report: &BatchReport) {
        if !report.is_empty() {
            self.batches += 1;
        }
        self.processed += report.processed;
        self.retried += report.retried;
        self.dead_lettered += report.dead_lettered;
    }
}

/// Handle to a spawned processor loop.
pub type ProcessorHandle = BackgroundTask<ProcessorStats>;

/// Drains an outbox into a [`DomainEventBus`] with at-least-once delivery.
///
/// Each batch claims due rows with skip-locked semantics, dispatches them one
/// by one in `occurred_at` order and commits every status change together.
/// A failed dispatch only affects its own row: the row is rescheduled with
/// exponential backoff, or moved to FAILED once it runs out of attempts.
/// Any number of processors may share one store.
///
/// ## Example
///
/// ```ignore
/// let processor = Arc::new(
///     OutboxProcessor::new(store, bus, registry)
///         .with_batch_size(50)
///         .with_poll_interval(Duration::from_millis(200)),
/// );
/// let task = processor.spawn();
/// // ...
/// let stats = task.stop().await;
/// ```
pub struct OutboxProcessor<S> {
    store: S,
    bus: Arc<DomainEventBus>,
    registry: Arc<EventRegistry>,
    clock: Arc<dyn Clock>,
    config: OutboxConfig,
    cancel: TokenSlot,
}

impl<S: OutboxStore> OutboxProcessor<S> {
    pub fn new(store: S, bus: Arc<DomainEventBus>, registry: Arc<EventRegistry>) -> Self {
        Self {
            store,
            bus,
            registry,
            clock: Arc::new(SystemClock),
            config: OutboxConfig::default(),
            cancel: TokenSlot::default(),
        }
    }

    pub fn with_config(mut self, config: OutboxConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval_ms = interval.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.config.max_attempts = max.max(1);
        self
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.config.backoff_base_secs = base.as_secs();
        self
    }

    /// Bound each dispatch. `None` lets handlers run as long as they like.
    pub fn with_dispatch_timeout(mut self, limit: Option<Duration>) -> Self {
        self.config.dispatch_timeout_ms = limit
            .map(|d| d.as_millis().try_into().unwrap_or(u64::MAX))
            .unwrap_or(0);
        self
    }

    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Claim, dispatch and commit one batch.
    ///
    /// Dispatch failures are recorded on their rows and never returned.
    /// Only store failures are, in which case no row of the batch changes.
    pub async fn process_batch(&self) -> Result<BatchReport, StoreError> {
        let mut tx = self.store.begin().await?;
        let mut records = tx
            .claim_due(self.clock.now(), self.config.batch_size)
            .await?;

        if records.is_empty() {
            tx.rollback().await?;
            return Ok(BatchReport::default());
        }

        let policy = self.config.retry_policy();
        let mut report = BatchReport {
            claimed: records.len(),
            ..Default::default()
        };

        for record in records.iter_mut() {
            match self.dispatch(record).await {
                Ok(()) => {
                    record.mark_processed(self.clock.now());
                    report.processed += 1;
                    tracing::debug!(
                        id = %record.id,
                        event_type = %record.event_type,
                        "outbox record processed"
                    );
                }
                Err(err) => {
                    let error = err.to_string();
                    match record.record_failure(error.as_str(), self.clock.now(), &policy) {
                        FailureOutcome::Rescheduled { delay } => {
                            report.retried += 1;
                            tracing::warn!(
                                id = %record.id,
                                event_type = %record.event_type,
                                attempts = record.attempts,
                                retry_in_secs = delay.as_secs(),
                                error = %error,
                                "outbox dispatch failed, retry scheduled"
                            );
                        }
                        FailureOutcome::DeadLettered => {
                            report.dead_lettered += 1;
                            tracing::error!(
                                id = %record.id,
                                event_type = %record.event_type,
                                attempts = record.attempts,
                                error = %error,
                                "outbox record dead-lettered"
                            );
                        }
                        FailureOutcome::Ignored => {}
                    }
                }
            }
            tx.save(record).await?;
        }

        tx.commit().await?;

        tracing::info!(
            claimed = report.claimed,
            processed = report.processed,
            retried = report.retried,
            dead_lettered = report.dead_lettered,
            "outbox batch committed"
        );
        Ok(report)
    }

    async fn dispatch(&self, record: &OutboxRecord) -> Result<(), DispatchError> {
        let event = self
            .registry
            .decode(&record.event_type, record.payload.clone())?;

        match self.config.dispatch_timeout() {
            Some(limit) => tokio::time::timeout(limit, self.bus.publish(event.as_ref()))
                .await
                .map_err(|_| DispatchError::TimedOut(limit))?,
            None => self.bus.publish(event.as_ref()).await,
        }
    }

    /// Poll until [`stop`](Self::stop) is called.
    ///
    /// Non-empty batches are followed by another claim right away; an empty
    /// poll sleeps for the poll interval. The stop signal is honoured between
    /// batches and while sleeping, never in the middle of a batch.
    pub async fn run_forever(&self) -> ProcessorStats {
        self.run_until(self.cancel.arm()).await
    }

    async fn run_until(&self, cancel: CancellationToken) -> ProcessorStats {
        tracing::info!(
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval_ms,
            max_attempts = self.config.max_attempts,
            "outbox processor started"
        );

        let mut stats = ProcessorStats::default();
        while !cancel.is_cancelled() {
            stats.polls += 1;

            let drained = match self.process_batch().await {
                Ok(report) => {
                    stats.absorb(&report);
                    !report.is_empty()
                }
                Err(err) => {
                    stats.store_errors += 1;
                    tracing::error!(error = %err, "outbox batch failed");
                    false
                }
            };

            if drained {
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }

        tracing::info!(
            processed = stats.processed,
            retried = stats.retried,
            dead_lettered = stats.dead_lettered,
            "outbox processor stopped"
        );
        stats
    }

    /// Ask a running loop to stop after its current batch.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl<S: OutboxStore + 'static> OutboxProcessor<S> {
    /// Run [`run_forever`](Self::run_forever) on the tokio runtime.
    pub fn spawn(self: Arc<Self>) -> ProcessorHandle {
        let cancel = self.cancel.arm();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { self.run_until(token).await });
        BackgroundTask::new("outbox-processor", cancel, handle)
    }
}
