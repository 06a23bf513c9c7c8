use std::collections::HashSet;
use std::sync::Arc;

use event_relay::{
    BrokerConnector, BrokerError, BrokerMessage, BrokerProducer, ConsumerRoutes, DomainEvent,
    EventRegistry, InMemoryBroker, IntegrationEvent, IntegrationEventConsumer,
    IntegrationEventProducer, MessageOutcome, EVENT_TYPE_HEADER,
};

use crate::support::auth::{self, AccountRegisteredIntegration};
use crate::support::handlers::Recorder;
use crate::support::wait_until;

const TOPIC: &str = AccountRegisteredIntegration::TOPIC;

fn users_registry() -> Arc<EventRegistry> {
    Arc::new(
        EventRegistry::builder()
            .register::<AccountRegisteredIntegration>()
            .build()
            .unwrap(),
    )
}

fn users_consumer(
    broker: &InMemoryBroker,
    seen: &Recorder<AccountRegisteredIntegration>,
) -> Arc<IntegrationEventConsumer<InMemoryBroker>> {
    let recorder = seen.clone();
    let routes = ConsumerRoutes::new(users_registry())
        .route::<AccountRegisteredIntegration, _, _>(move || recorder.clone());
    Arc::new(IntegrationEventConsumer::new(broker.clone(), routes))
}

fn registration(id: &str) -> AccountRegisteredIntegration {
    AccountRegisteredIntegration {
        account_id: id.to_string(),
        email: format!("{id}@example.com"),
    }
}

async fn send_raw(broker: &InMemoryBroker, message: BrokerMessage) {
    let producer = broker.connect_producer().await.unwrap();
    producer.send_and_wait(message).await.unwrap();
}

#[tokio::test]
async fn producer_refuses_to_publish_until_started() {
    let broker = InMemoryBroker::new();
    let producer = IntegrationEventProducer::new(broker.clone(), auth::registry());

    let err = producer.publish_event(&registration("acc-1")).await.unwrap_err();
    assert!(matches!(err, BrokerError::ProducerNotStarted));
    assert_eq!(err.to_string(), "producer not started");

    producer.start().await.unwrap();
    producer.publish_event(&registration("acc-1")).await.unwrap();
    producer.stop().await.unwrap();

    let err = producer.publish_event(&registration("acc-2")).await.unwrap_err();
    assert!(matches!(err, BrokerError::ProducerNotStarted));

    let messages = broker.messages(TOPIC);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].event_type(), Some("AccountRegisteredIntegration"));
    let body: serde_json::Value = serde_json::from_slice(&messages[0].body).unwrap();
    assert_eq!(body["account_id"], "acc-1");
}

#[tokio::test]
async fn unknown_event_types_are_skipped_and_consumption_continues() {
    let broker = InMemoryBroker::new();
    let seen = Recorder::default();
    let consumer = users_consumer(&broker, &seen);
    consumer.start(&[TOPIC.to_string()], "users").await.unwrap();
    let task = Arc::clone(&consumer).spawn().await.unwrap();

    send_raw(
        &broker,
        BrokerMessage::new(TOPIC, br#"{"account_id":"acc-0"}"#.to_vec())
            .with_header(EVENT_TYPE_HEADER, "AccountDeleted"),
    )
    .await;
    send_raw(&broker, BrokerMessage::new(TOPIC, b"{}".to_vec())).await;
    let body = serde_json::to_vec(&registration("acc-1").to_map().unwrap()).unwrap();
    send_raw(
        &broker,
        BrokerMessage::new(TOPIC, body).with_header(EVENT_TYPE_HEADER, "AccountRegisteredIntegration"),
    )
    .await;

    assert!(wait_until(|| seen.len() == 1).await);
    let stats = task.stop().await;

    assert_eq!(stats.received, 3);
    assert_eq!(stats.skipped, 2);
    assert_eq!(stats.handled, 1);
    assert_eq!(seen.seen()[0].account_id, "acc-1");
}

#[tokio::test]
async fn undecodable_bodies_fail_without_stopping_the_loop() {
    let broker = InMemoryBroker::new();
    let seen = Recorder::default();
    let consumer = users_consumer(&broker, &seen);

    let garbage = BrokerMessage::new(TOPIC, b"not json".to_vec())
        .with_header(EVENT_TYPE_HEADER, "AccountRegisteredIntegration");
    assert_eq!(consumer.handle_message(&garbage).await, MessageOutcome::Failed);

    let missing_field = BrokerMessage::new(TOPIC, br#"{"account_id":"acc-1"}"#.to_vec())
        .with_header(EVENT_TYPE_HEADER, "AccountRegisteredIntegration");
    assert_eq!(
        consumer.handle_message(&missing_field).await,
        MessageOutcome::Failed
    );
    assert_eq!(seen.len(), 0);
}

#[tokio::test]
async fn consumer_must_be_started_before_it_runs() {
    let broker = InMemoryBroker::new();
    let consumer = users_consumer(&broker, &Recorder::default());

    assert!(!consumer.is_started().await);
    assert!(matches!(
        consumer.run_forever().await,
        Err(BrokerError::ConsumerNotStarted)
    ));
    assert!(matches!(
        Arc::clone(&consumer).spawn().await,
        Err(BrokerError::ConsumerNotStarted)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn consumers_in_one_group_split_messages_and_other_groups_see_all() {
    let broker = InMemoryBroker::new();
    let producer = IntegrationEventProducer::new(broker.clone(), auth::registry());
    producer.start().await.unwrap();

    let users = Recorder::default();
    let members = [users_consumer(&broker, &users), users_consumer(&broker, &users)];
    let audit = Recorder::default();
    let auditor = users_consumer(&broker, &audit);

    let topics = [TOPIC.to_string()];
    let mut tasks = Vec::new();
    for member in &members {
        member.start(&topics, "users").await.unwrap();
        tasks.push(Arc::clone(member).spawn().await.unwrap());
    }
    auditor.start(&topics, "audit").await.unwrap();
    tasks.push(Arc::clone(&auditor).spawn().await.unwrap());

    for n in 0..20 {
        producer
            .publish_event(&registration(&format!("acc-{n}")))
            .await
            .unwrap();
    }

    assert!(wait_until(|| users.len() == 20 && audit.len() == 20).await);
    let mut handled = 0;
    for task in tasks.drain(..2) {
        handled += task.stop().await.handled;
    }
    for task in tasks {
        task.stop().await;
    }

    let unique: HashSet<String> = users.seen().into_iter().map(|e| e.account_id).collect();
    assert_eq!(unique.len(), 20);
    assert_eq!(handled, 20);
    assert_eq!(broker.offset("users", TOPIC), 20);
    assert_eq!(broker.offset("audit", TOPIC), 20);
}
