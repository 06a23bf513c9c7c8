//! Shared test domain: an auth module's account aggregate, its events and
//! a handful of scripted handlers.

#![allow(dead_code)]


use std::sync::Arc;

use chrono::{TimeZone, Utc};
use event_relay::{Clock, EventRegistry, ManualClock, OutboxStatus, OutboxStore, UnitOfWork};

use auth::Account;

/// A clock frozen at a fixed, readable instant.
pub fn frozen_clock() -> Arc<ManualClock> {
    let start = Utc
        .with_ymd_and_hms(2024, 1, 1, 12, 0, 0)
        .single()
        .expect("valid start time");
    Arc::new(ManualClock::new(start))
}

pub async fn count<S: OutboxStore>(store: &S, status: OutboxStatus) -> usize {
    store.count_by_status(status).await.unwrap()
}

/// Register one account per id in a single unit of work.
pub async fn register_accounts<S: OutboxStore>(
    store: S,
    registry: &Arc<EventRegistry>,
    clock: Arc<dyn Clock>,
    ids: &[&str],
) -> usize {
    let mut uow = UnitOfWork::new(store, Arc::clone(registry)).with_clock(clock);
    uow.begin().await.unwrap();
    let accounts: Vec<Account> = ids
        .iter()
        .map(|id| Account::register(id, &format!("{id}@example.com")))
        .collect();
    for account in &accounts {
        uow.track(account);
    }
    uow.commit().await.unwrap()
}

/// Poll `check` every 10ms for up to five seconds.
pub async fn wait_until<F: FnMut() -> bool>(mut check: F) -> bool {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    check()
}
