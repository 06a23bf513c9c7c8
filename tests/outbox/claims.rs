use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use event_relay::{
    Clock, DomainEventBus, InMemoryOutboxStore, OutboxProcessor, OutboxStatus, OutboxStore,
    OutboxTransaction, SystemClock,
};

use crate::support::auth::{self, AccountRegistered};
use crate::support::handlers::Recorder;
use crate::support::{count, frozen_clock, register_accounts, wait_until};

#[tokio::test]
async fn rows_locked_by_an_open_transaction_are_skipped() {
    let store = InMemoryOutboxStore::new();
    let registry = auth::registry();
    let clock = frozen_clock();
    register_accounts(store.clone(), &registry, clock.clone(), &["acc-1", "acc-2", "acc-3"]).await;

    let mut other = store.begin().await.unwrap();
    let held = other.claim_due(clock.now(), 2).await.unwrap();
    assert_eq!(held.len(), 2);

    let processor = OutboxProcessor::new(
        store.clone(),
        Arc::new(DomainEventBus::builder().build()),
        registry,
    )
    .with_clock(clock.clone());

    let report = processor.process_batch().await.unwrap();
    assert_eq!(report.claimed, 1);
    assert!(processor.process_batch().await.unwrap().is_empty());

    other.rollback().await.unwrap();
    let report = processor.process_batch().await.unwrap();
    assert_eq!(report.claimed, 2);
    assert_eq!(count(&store, OutboxStatus::Processed).await, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn competing_processors_deliver_each_record_once() {
    let store = InMemoryOutboxStore::new();
    let registry = auth::registry();
    let seen = Recorder::<AccountRegistered>::default();

    let ids: Vec<String> = (0..60).map(|n| format!("acc-{n}")).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    register_accounts(store.clone(), &registry, clock, &id_refs).await;

    let spawn = |seen: Recorder<AccountRegistered>| {
        let bus = DomainEventBus::builder()
            .subscribe::<AccountRegistered, _, _>(move || seen.clone())
            .build();
        Arc::new(
            OutboxProcessor::new(store.clone(), Arc::new(bus), registry.clone())
                .with_batch_size(4)
                .with_poll_interval(Duration::from_millis(5)),
        )
        .spawn()
    };
    let first = spawn(seen.clone());
    let second = spawn(seen.clone());

    assert!(wait_until(|| seen.len() >= ids.len()).await);
    let a = first.stop().await;
    let b = second.stop().await;

    let mut deliveries: HashMap<String, usize> = HashMap::new();
    for event in seen.seen() {
        *deliveries.entry(event.account_id).or_default() += 1;
    }
    assert_eq!(deliveries.len(), ids.len());
    assert!(deliveries.values().all(|&n| n == 1));
    assert_eq!(a.processed + b.processed, ids.len());
    assert_eq!(count(&store, OutboxStatus::Pending).await, 0);
}
