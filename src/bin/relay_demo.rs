//! Two modules in one process: `auth` registers accounts and `users`
//! creates a profile for each one it hears about over the broker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use event_relay::{
    impl_aggregate, Aggregate, ConsumerRoutes, DomainEvent, DomainEventBus, EventHandler,
    EventRegistry, HandlerFailurePolicy, InMemoryBroker, InMemoryOutboxStore, IntegrationEvent,
    IntegrationEventConsumer, IntegrationEventProducer, ModuleRuntime, OutboxProcessor,
    OutboxStatus, OutboxStore, PendingEvents, RelayConfig, RelayToBroker, UnitOfWork,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccountRegistered {
    account_id: String,
    email: String,
}

impl DomainEvent for AccountRegistered {}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccountRegisteredIntegration {
    account_id: String,
    email: String,
}

impl DomainEvent for AccountRegisteredIntegration {}

impl IntegrationEvent for AccountRegisteredIntegration {
    const TOPIC: &'static str = "account.registered";
}

#[derive(Default)]
struct Account {
    id: String,
    email: String,
    events: PendingEvents,
}

impl Account {
    fn register(id: &str, email: &str) -> Self {
        let mut account = Account {
            id: id.to_string(),
            email: email.to_string(),
            ..Default::default()
        };
        account.record(AccountRegistered {
            account_id: account.id.clone(),
            email: account.email.clone(),
        });
        account
    }
}

impl_aggregate!(Account, id, events);

struct SendVerificationEmail;

#[async_trait]
impl EventHandler<AccountRegistered> for SendVerificationEmail {
    async fn handle(&self, event: &AccountRegistered) -> anyhow::Result<()> {
        tracing::info!(account_id = %event.account_id, email = %event.email, "verification email sent");
        Ok(())
    }
}

type Profiles = Arc<Mutex<HashMap<String, String>>>;

struct CreateProfile {
    profiles: Profiles,
}

#[async_trait]
impl EventHandler<AccountRegisteredIntegration> for CreateProfile {
    async fn handle(&self, event: &AccountRegisteredIntegration) -> anyhow::Result<()> {
        let mut profiles = self
            .profiles
            .lock()
            .map_err(|_| anyhow::anyhow!("profile table poisoned"))?;
        profiles.insert(event.account_id.clone(), event.email.clone());
        tracing::info!(account_id = %event.account_id, "profile created");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "event_relay=info,relay_demo=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = RelayConfig::from_env()?;
    if config.consumer.topics.is_empty() {
        config.consumer.topics = vec![AccountRegisteredIntegration::TOPIC.to_string()];
    }
    let broker = InMemoryBroker::new();

    // auth: outbox -> bus -> verification email + relay to the broker
    let auth_registry = Arc::new(
        EventRegistry::builder()
            .register::<AccountRegistered>()
            .register::<AccountRegisteredIntegration>()
            .build()?,
    );
    let auth_store = InMemoryOutboxStore::new();
    let auth_producer = Arc::new(IntegrationEventProducer::new(
        broker.clone(),
        Arc::clone(&auth_registry),
    ));
    let relay = RelayToBroker::new(Arc::clone(&auth_producer), |e: &AccountRegistered| {
        AccountRegisteredIntegration {
            account_id: e.account_id.clone(),
            email: e.email.clone(),
        }
    });
    let auth_bus = DomainEventBus::builder()
        .subscribe::<AccountRegistered, _, _>(|| SendVerificationEmail)
        .subscribe::<AccountRegistered, _, _>(relay.factory())
        .failure_policy(HandlerFailurePolicy::Propagate)
        .build();
    let auth_processor = Arc::new(
        OutboxProcessor::new(auth_store.clone(), Arc::new(auth_bus), Arc::clone(&auth_registry))
            .with_config(config.outbox.clone()),
    );
    let auth = ModuleRuntime::new("auth", auth_processor)
        .with_producer(auth_producer)
        .start()
        .await?;

    // users: consumes account registrations from the broker
    let users_registry = Arc::new(
        EventRegistry::builder()
            .register::<AccountRegisteredIntegration>()
            .build()?,
    );
    let profiles: Profiles = Arc::default();
    let routes = {
        let profiles = Arc::clone(&profiles);
        ConsumerRoutes::new(Arc::clone(&users_registry)).route::<AccountRegisteredIntegration, _, _>(
            move || CreateProfile {
                profiles: Arc::clone(&profiles),
            },
        )
    };
    let users_processor = Arc::new(
        OutboxProcessor::new(
            InMemoryOutboxStore::new(),
            Arc::new(DomainEventBus::builder().build()),
            users_registry,
        )
        .with_config(config.outbox.clone()),
    );
    let users = ModuleRuntime::new("users", users_processor)
        .with_consumer(
            Arc::new(IntegrationEventConsumer::new(broker.clone(), routes)),
            config.consumer.clone(),
        )
        .start()
        .await?;

    let signups = [
        ("acc-1", "ada@example.com"),
        ("acc-2", "grace@example.com"),
        ("acc-3", "edsger@example.com"),
    ];
    for (id, email) in signups {
        let mut uow = UnitOfWork::new(auth_store.clone(), Arc::clone(&auth_registry));
        uow.begin().await?;
        let account = Account::register(id, email);
        uow.track(&account);
        uow.commit().await?;
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let created = profiles
            .lock()
            .map_err(|_| anyhow::anyhow!("profile table poisoned"))?
            .len();
        if created == signups.len() || tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let users_stats = users.stop().await?;
    let auth_stats = auth.stop().await?;

    let pending = auth_store.count_by_status(OutboxStatus::Pending).await?;
    let failed = auth_store.count_by_status(OutboxStatus::Failed).await?;
    tracing::info!(
        processed = auth_stats.processor.processed,
        pending,
        failed,
        profiles_created = users_stats.consumer.map_or(0, |c| c.handled),
        "demo finished"
    );
    Ok(())
}
