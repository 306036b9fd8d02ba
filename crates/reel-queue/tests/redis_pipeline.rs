//! Producer and broker against a live Redis.

use std::sync::Arc;
use std::time::Duration;

use reel_models::{JobStatus, JobType, ProductId};
use reel_queue::{
    Attempt, Broker, ConnectionConfig, ConnectionManager, ContentGenerationJob, EnqueueError,
    JobPayload, JobProducer, RedisBroker, RETRY_HEADER,
};
use reel_store::{JobStore, RedisStore, StoreConfig, Transition};

async fn connect(prefix: &str) -> (Arc<RedisStore>, Arc<RedisBroker>) {
    let connection = ConnectionManager::new(ConnectionConfig {
        prefix: prefix.to_string(),
        ..ConnectionConfig::from_env()
    })
    .expect("valid broker config");
    connection
        .register_queue(JobType::ContentGeneration)
        .await
        .expect("register queue");
    connection.connect().await.expect("Redis reachable");

    let store = RedisStore::new(StoreConfig {
        prefix: prefix.to_string(),
        ..StoreConfig::from_env()
    })
    .expect("valid store config");
    (Arc::new(store), Arc::new(RedisBroker::new(connection)))
}

fn unique_prefix() -> String {
    format!("reel-it-{}", uuid::Uuid::new_v4().simple())
}

fn payload() -> JobPayload {
    JobPayload::ContentGeneration(ContentGenerationJob {
        product_id: ProductId::from_string("p1"),
    })
}

#[tokio::test]
#[ignore = "requires a running Redis at REDIS_URL"]
async fn test_enqueue_consume_retry_and_dead_letter() {
    let (store, broker) = connect(&unique_prefix()).await;
    let producer = JobProducer::new(store.clone(), broker.clone());

    let job_id = producer.enqueue(payload(), 3).await.unwrap();
    assert!(matches!(
        producer.enqueue(payload(), 9).await,
        Err(EnqueueError::Duplicate { existing }) if existing == job_id
    ));

    let first = broker
        .consume(JobType::ContentGeneration, "it-worker", 1, Duration::from_millis(500))
        .await
        .unwrap();
    assert_eq!(first.len(), 1);
    let delivery = &first[0];
    assert_eq!(delivery.parse().unwrap().job_id, job_id);
    assert_eq!(delivery.priority(), 3);
    assert_eq!(delivery.attempt(3), Attempt::initial());

    store.transition(&job_id, Transition::Activate).await.unwrap();
    store
        .transition(&job_id, Transition::Retry("timeout".into()))
        .await
        .unwrap();
    let message = delivery.parse().unwrap();
    broker
        .publish(&message, delivery.priority(), delivery.attempt(3).next())
        .await
        .unwrap();
    broker.ack(delivery).await.unwrap();

    let second = broker
        .consume(JobType::ContentGeneration, "it-worker", 1, Duration::from_millis(500))
        .await
        .unwrap();
    assert_eq!(second[0].fields[RETRY_HEADER], "1");

    store.transition(&job_id, Transition::Activate).await.unwrap();
    store
        .transition(&job_id, Transition::Fail("gave up".into()))
        .await
        .unwrap();
    broker.reject(&second[0], "gave up").await.unwrap();

    assert_eq!(broker.dead_lettered().await.unwrap(), 1);
    let job = store.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 2);
}

#[tokio::test]
#[ignore = "requires a running Redis at REDIS_URL"]
async fn test_unacked_message_is_reclaimed() {
    let (store, broker) = connect(&unique_prefix()).await;
    let producer = JobProducer::new(store, broker.clone());
    producer.enqueue(payload(), 0).await.unwrap();

    let taken = broker
        .consume(JobType::ContentGeneration, "crashed", 1, Duration::from_millis(500))
        .await
        .unwrap();
    assert_eq!(taken.len(), 1);

    let reclaimed = broker
        .reclaim(JobType::ContentGeneration, "rescuer", Duration::ZERO, 10)
        .await
        .unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].id, taken[0].id);
    broker.ack(&reclaimed[0]).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running Redis at REDIS_URL"]
async fn test_polling_reuses_one_reader_per_consumer() {
    let (_store, broker) = connect(&unique_prefix()).await;

    for _ in 0..5 {
        broker
            .consume(JobType::ContentGeneration, "poller", 1, Duration::from_millis(10))
            .await
            .unwrap();
    }
    assert_eq!(broker.reader_count().await, 1);

    broker
        .consume(JobType::ContentGeneration, "second", 1, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(broker.reader_count().await, 2);
}

#[tokio::test]
#[ignore = "requires a running Redis at REDIS_URL"]
async fn test_touch_keeps_running_delivery_from_reclaim() {
    let (store, broker) = connect(&unique_prefix()).await;
    JobProducer::new(store, broker.clone())
        .enqueue(payload(), 0)
        .await
        .unwrap();

    let taken = broker
        .consume(JobType::ContentGeneration, "busy", 1, Duration::from_millis(500))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    broker.touch(&taken[0], "busy").await.unwrap();

    let reclaimed = broker
        .reclaim(JobType::ContentGeneration, "rescuer", Duration::from_millis(250), 10)
        .await
        .unwrap();
    assert!(reclaimed.is_empty());
    broker.ack(&taken[0]).await.unwrap();
}
