use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as Elapsed;
use event_relay::{
    Clock, DomainEventBus, DomainEventBusBuilder, EventRegistry, HandlerFailurePolicy,
    InMemoryOutboxStore, ManualClock, OutboxProcessor, OutboxRecord, OutboxStatus, SystemClock,
    UnitOfWork,
};

use crate::support::auth::{self, Account, AccountRegistered, PasswordResetCompleted};
use crate::support::handlers::{AlwaysFails, Flaky, Recorder, Slow};
use crate::support::{count, frozen_clock, register_accounts, wait_until};

struct Harness {
    store: InMemoryOutboxStore,
    registry: Arc<EventRegistry>,
    clock: Arc<ManualClock>,
    processor: OutboxProcessor<InMemoryOutboxStore>,
}

impl Harness {
    fn new(bus: DomainEventBusBuilder) -> Self {
        let store = InMemoryOutboxStore::new();
        let registry = auth::registry();
        let clock = frozen_clock();
        let processor = OutboxProcessor::new(store.clone(), Arc::new(bus.build()), registry.clone())
            .with_clock(clock.clone());
        Self {
            store,
            registry,
            clock,
            processor,
        }
    }

    async fn register(&self, ids: &[&str]) -> usize {
        register_accounts(self.store.clone(), &self.registry, self.clock.clone(), ids).await
    }

    fn only_row(&self) -> OutboxRecord {
        let mut rows = self.store.records().unwrap();
        assert_eq!(rows.len(), 1);
        rows.remove(0)
    }

    fn advance(&self, secs: i64) {
        self.clock.advance(Elapsed::seconds(secs));
    }
}

fn propagating() -> DomainEventBusBuilder {
    DomainEventBus::builder().failure_policy(HandlerFailurePolicy::Propagate)
}

#[tokio::test]
async fn event_without_subscribers_is_marked_processed() {
    let harness = Harness::new(DomainEventBus::builder());
    harness.register(&["acc-1"]).await;

    let report = harness.processor.process_batch().await.unwrap();

    assert_eq!(report.claimed, 1);
    assert_eq!(report.processed, 1);
    let row = harness.only_row();
    assert_eq!(row.status, OutboxStatus::Processed);
    assert_eq!(row.processed_at, Some(harness.clock.now()));
}

#[tokio::test]
async fn handler_failing_twice_succeeds_on_the_third_attempt() {
    let flaky = Flaky::new(2);
    let handler = flaky.clone();
    let harness = Harness::new(
        propagating().subscribe::<AccountRegistered, _, _>(move || handler.clone()),
    );
    harness.register(&["acc-1"]).await;

    let first = harness.processor.process_batch().await.unwrap();
    assert_eq!(first.retried, 1);
    let row = harness.only_row();
    assert_eq!(row.status, OutboxStatus::Pending);
    assert_eq!(row.attempts, 1);
    assert_eq!(row.scheduled_at, harness.clock.now() + Elapsed::seconds(20));

    // not due yet
    assert!(harness.processor.process_batch().await.unwrap().is_empty());

    harness.advance(20);
    let second = harness.processor.process_batch().await.unwrap();
    assert_eq!(second.retried, 1);
    let row = harness.only_row();
    assert_eq!(row.attempts, 2);
    assert_eq!(row.scheduled_at, harness.clock.now() + Elapsed::seconds(40));

    harness.advance(40);
    let third = harness.processor.process_batch().await.unwrap();
    assert_eq!(third.processed, 1);

    let row = harness.only_row();
    assert_eq!(row.status, OutboxStatus::Processed);
    assert_eq!(row.attempts, 2);
    let last_error = row.last_error.as_deref().unwrap();
    assert!(last_error.contains("smtp unavailable on call 2"), "{last_error}");
    assert_eq!(flaky.calls(), 3);
}

#[tokio::test]
async fn handler_that_never_succeeds_is_dead_lettered_after_five_attempts() {
    let failing = AlwaysFails::default();
    let handler = failing.clone();
    let harness = Harness::new(
        propagating().subscribe::<AccountRegistered, _, _>(move || handler.clone()),
    );
    harness.register(&["acc-1"]).await;

    for (attempt, wait) in [20, 40, 80, 160].into_iter().enumerate() {
        let report = harness.processor.process_batch().await.unwrap();
        assert_eq!(report.retried, 1, "attempt {}", attempt + 1);
        harness.advance(wait);
    }

    let last = harness.processor.process_batch().await.unwrap();
    assert_eq!(last.dead_lettered, 1);

    let row = harness.only_row();
    assert_eq!(row.status, OutboxStatus::Failed);
    assert_eq!(row.attempts, 5);
    assert!(row.last_error.as_deref().unwrap().contains("downstream rejected"));

    harness.advance(86_400);
    assert!(harness.processor.process_batch().await.unwrap().is_empty());
    assert_eq!(failing.calls(), 5);
}

#[tokio::test]
async fn one_failing_record_does_not_hold_back_its_batch() {
    let resets = Recorder::<PasswordResetCompleted>::default();
    let recorder = resets.clone();
    let harness = Harness::new(
        propagating()
            .subscribe::<AccountRegistered, _, _>(AlwaysFails::default)
            .subscribe::<PasswordResetCompleted, _, _>(move || recorder.clone()),
    );

    let mut uow = UnitOfWork::new(harness.store.clone(), harness.registry.clone())
        .with_clock(harness.clock.clone());
    uow.begin().await.unwrap();
    let mut account = Account::register("acc-1", "ada@example.com");
    account.complete_password_reset();
    uow.track(&account);
    uow.commit().await.unwrap();

    let report = harness.processor.process_batch().await.unwrap();

    assert_eq!(report.claimed, 2);
    assert_eq!(report.processed, 1);
    assert_eq!(report.retried, 1);
    assert_eq!(resets.len(), 1);
    assert_eq!(count(&harness.store, OutboxStatus::Processed).await, 1);
    assert_eq!(count(&harness.store, OutboxStatus::Pending).await, 1);
}

#[tokio::test]
async fn records_are_dispatched_in_occurrence_order() {
    let seen = Recorder::<AccountRegistered>::default();
    let recorder = seen.clone();
    let harness = Harness::new(
        DomainEventBus::builder().subscribe::<AccountRegistered, _, _>(move || recorder.clone()),
    );
    let start = harness.clock.now();

    harness.clock.set(start + Elapsed::seconds(2));
    harness.register(&["acc-3"]).await;
    harness.clock.set(start);
    harness.register(&["acc-1"]).await;
    harness.clock.set(start + Elapsed::seconds(1));
    harness.register(&["acc-2"]).await;
    harness.clock.set(start + Elapsed::seconds(5));

    harness.processor.process_batch().await.unwrap();

    let order: Vec<String> = seen.seen().into_iter().map(|e| e.account_id).collect();
    assert_eq!(order, ["acc-1", "acc-2", "acc-3"]);
}

#[tokio::test]
async fn batches_are_capped_at_the_batch_size() {
    let mut harness = Harness::new(DomainEventBus::builder());
    harness.processor = harness.processor.with_batch_size(2);
    harness
        .register(&["acc-1", "acc-2", "acc-3", "acc-4", "acc-5"])
        .await;

    let mut claimed = Vec::new();
    loop {
        let report = harness.processor.process_batch().await.unwrap();
        if report.is_empty() {
            break;
        }
        claimed.push(report.claimed);
    }

    assert_eq!(claimed, [2, 2, 1]);
    assert_eq!(count(&harness.store, OutboxStatus::Processed).await, 5);
}

#[tokio::test]
async fn best_effort_bus_marks_records_processed_despite_handler_errors() {
    let failing = AlwaysFails::default();
    let handler = failing.clone();
    let harness = Harness::new(
        DomainEventBus::builder().subscribe::<AccountRegistered, _, _>(move || handler.clone()),
    );
    harness.register(&["acc-1"]).await;

    let report = harness.processor.process_batch().await.unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(failing.calls(), 1);
    let row = harness.only_row();
    assert_eq!(row.status, OutboxStatus::Processed);
    assert_eq!(row.attempts, 0);
}

#[tokio::test]
async fn store_failure_leaves_the_batch_untouched() {
    let harness = Harness::new(DomainEventBus::builder());
    harness.register(&["acc-1"]).await;

    harness.store.reject_commits(true).unwrap();
    assert!(harness.processor.process_batch().await.is_err());
    assert_eq!(count(&harness.store, OutboxStatus::Pending).await, 1);

    harness.store.reject_commits(false).unwrap();
    let report = harness.processor.process_batch().await.unwrap();
    assert_eq!(report.processed, 1);
}

#[tokio::test]
async fn spawned_processor_drains_the_outbox_until_stopped() {
    let store = InMemoryOutboxStore::new();
    let registry = auth::registry();
    let seen = Recorder::<AccountRegistered>::default();
    let recorder = seen.clone();
    let bus = DomainEventBus::builder()
        .subscribe::<AccountRegistered, _, _>(move || recorder.clone())
        .build();
    let processor = Arc::new(
        OutboxProcessor::new(store.clone(), Arc::new(bus), registry.clone())
            .with_poll_interval(Duration::from_millis(10)),
    );

    let task = processor.spawn();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    register_accounts(store.clone(), &registry, clock, &["acc-1", "acc-2"]).await;

    assert!(wait_until(|| seen.len() == 2).await);
    let stats = task.stop().await;

    assert_eq!(stats.processed, 2);
    assert_eq!(stats.store_errors, 0);
    assert!(stats.polls >= 1);
    assert_eq!(count(&store, OutboxStatus::Processed).await, 2);
}

#[tokio::test]
async fn stopping_mid_batch_finishes_and_commits_the_batch() {
    let slow = Slow::new(Duration::from_millis(200));
    let handler = slow.clone();
    let harness = Harness::new(
        propagating().subscribe::<AccountRegistered, _, _>(move || handler.clone()),
    );
    harness.register(&["acc-1", "acc-2", "acc-3"]).await;

    let Harness { store, processor, .. } = harness;
    let task = Arc::new(processor).spawn();
    slow.started().await;

    let stats = task.stop().await;

    assert_eq!(stats.processed, 3);
    assert_eq!(slow.finished(), 3);
    assert_eq!(count(&store, OutboxStatus::Processed).await, 3);
    assert_eq!(count(&store, OutboxStatus::Pending).await, 0);
}
