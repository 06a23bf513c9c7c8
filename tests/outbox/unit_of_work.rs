use event_relay::{
    Aggregate, InMemoryOutboxStore, OutboxStatus, OutboxStore, StoreError, UnitOfWork,
};

use crate::support::auth::{self, Account};
use crate::support::{count, frozen_clock};

#[tokio::test]
async fn commit_writes_one_pending_row_per_staged_event() {
    let store = InMemoryOutboxStore::new();
    let mut uow = UnitOfWork::new(store.clone(), auth::registry()).with_clock(frozen_clock());

    uow.begin().await.unwrap();
    let mut account = Account::register("acc-1", "ada@example.com");
    account.request_verification();
    uow.track(&account);

    let written = uow.commit().await.unwrap();

    assert_eq!(written, 2);
    assert!(!account.has_pending_events());

    let rows = store.records_by_status(OutboxStatus::Pending).await.unwrap();
    let names: Vec<&str> = rows.iter().map(|r| r.event_type.as_str()).collect();
    assert_eq!(names, ["AccountRegistered", "VerificationRequested"]);
    assert!(rows.iter().all(|r| r.attempts == 0 && r.last_error.is_none()));
    assert_eq!(rows[0].payload["email"], "ada@example.com");
}

#[tokio::test]
async fn rows_are_invisible_until_commit() {
    let store = InMemoryOutboxStore::new();
    let mut uow = UnitOfWork::new(store.clone(), auth::registry());

    uow.begin().await.unwrap();
    let account = Account::register("acc-1", "ada@example.com");
    uow.track(&account);

    assert!(store.is_empty().unwrap());
    uow.commit().await.unwrap();
    assert_eq!(store.len().unwrap(), 1);
}

#[tokio::test]
async fn rollback_keeps_events_staged_and_writes_nothing() {
    let store = InMemoryOutboxStore::new();
    let mut uow = UnitOfWork::new(store.clone(), auth::registry());

    uow.begin().await.unwrap();
    let account = Account::register("acc-1", "ada@example.com");
    uow.track(&account);
    uow.rollback().await.unwrap();

    assert!(store.is_empty().unwrap());
    assert!(account.has_pending_events());
    assert!(!uow.is_active());
}

#[tokio::test]
async fn failed_commit_leaves_events_for_the_next_attempt() {
    let store = InMemoryOutboxStore::new();
    let registry = auth::registry();
    let account = Account::register("acc-1", "ada@example.com");

    store.reject_commits(true).unwrap();
    let mut uow = UnitOfWork::new(store.clone(), registry.clone());
    uow.begin().await.unwrap();
    uow.track(&account);
    let err = uow.commit().await.unwrap_err();

    assert!(matches!(err, StoreError::Unavailable(_)));
    assert!(account.has_pending_events());
    assert!(store.is_empty().unwrap());

    store.reject_commits(false).unwrap();
    let mut retry = UnitOfWork::new(store.clone(), registry);
    retry.begin().await.unwrap();
    retry.track(&account);
    assert_eq!(retry.commit().await.unwrap(), 1);
    assert!(!account.has_pending_events());
    assert_eq!(count(&store, OutboxStatus::Pending).await, 1);
}

#[tokio::test]
async fn commit_without_begin_is_rejected() {
    let mut uow = UnitOfWork::new(InMemoryOutboxStore::new(), auth::registry());
    let account = Account::register("acc-1", "ada@example.com");
    uow.track(&account);

    let err = uow.commit().await.unwrap_err();

    assert!(matches!(err, StoreError::SessionNotInitialized));
    assert!(account.has_pending_events());
}

#[tokio::test]
async fn several_aggregates_share_one_transaction() {
    let store = InMemoryOutboxStore::new();
    let mut uow = UnitOfWork::new(store.clone(), auth::registry());

    uow.begin().await.unwrap();
    let first = Account::register("acc-1", "ada@example.com");
    let mut second = Account::register("acc-2", "grace@example.com");
    second.complete_password_reset();
    uow.track(&first);
    uow.track(&second);
    uow.track(&first);
    assert_eq!(uow.tracked_count(), 2);

    assert_eq!(uow.commit().await.unwrap(), 3);
    assert_eq!(count(&store, OutboxStatus::Pending).await, 3);
}
