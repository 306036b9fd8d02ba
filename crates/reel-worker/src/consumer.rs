//! Worker consumer: one per job type.
//!
//! A consumer holds at most `prefetch` unacknowledged deliveries. Each
//! delivery is parsed, activated on the job record, dispatched to the
//! handler, and then either completed and acknowledged or handed to the
//! retry coordinator. Acknowledgement always follows the durable write.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use reel_models::JobType;
use reel_queue::metrics::names;
use reel_queue::{Attempt, Broker, Delivery, QueueMessage};
use reel_store::{JobStore, StoreError, Transition};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::handlers::JobHandler;
use crate::logging::JobLogger;
use crate::progress::ProgressReporter;
use crate::retry::{FailureTracker, RetryCoordinator, RetryOutcome};

/// Pause after a failed broker read.
const CONSUME_BACKOFF: Duration = Duration::from_secs(5);

/// Lower bound on the idle-refresh period of a running delivery.
const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Handler succeeded; job completed and message acknowledged
    Completed,
    /// Failed and republished with this attempt
    Requeued(Attempt),
    /// Failed permanently or malformed; message dead-lettered
    Discarded,
    /// Job already terminal; message acknowledged without running
    Skipped,
    /// A write failed; message left pending for redelivery
    Deferred,
    /// Same message already running on this consumer; left to that run
    InFlight,
}

/// Consumes one job type's queue.
pub struct WorkerConsumer {
    job_type: JobType,
    consumer_name: String,
    broker: Arc<dyn Broker>,
    store: Arc<dyn JobStore>,
    handler: Arc<dyn JobHandler>,
    retry: RetryCoordinator,
    prefetch: usize,
    semaphore: Arc<Semaphore>,
    max_attempts: u32,
    block: Duration,
    claim_interval: Duration,
    claim_min_idle: Duration,
    shutdown_timeout: Duration,
    in_flight: Mutex<HashSet<String>>,
}

/// Holds a message id in the in-flight set until dropped.
struct InFlightGuard<'a> {
    ids: &'a Mutex<HashSet<String>>,
    id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

impl WorkerConsumer {
    pub fn new(
        job_type: JobType,
        config: &WorkerConfig,
        broker: Arc<dyn Broker>,
        store: Arc<dyn JobStore>,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        let prefetch = config.prefetch(job_type);
        let id = Uuid::new_v4().simple().to_string();
        Self {
            job_type,
            consumer_name: format!("worker-{}-{}", job_type.as_str(), &id[..8]),
            retry: RetryCoordinator::new(broker.clone(), config.max_attempts),
            broker,
            store,
            handler,
            prefetch,
            semaphore: Arc::new(Semaphore::new(prefetch)),
            max_attempts: config.max_attempts,
            block: config.block,
            claim_interval: config.claim_interval,
            claim_min_idle: config.claim_min_idle,
            shutdown_timeout: config.shutdown_timeout,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    pub fn prefetch(&self) -> usize {
        self.prefetch
    }

    /// Consume until `shutdown` flips, then wait for in-flight jobs.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            consumer = %self.consumer_name,
            job_type = %self.job_type,
            prefetch = self.prefetch,
            "Starting consumer"
        );

        if let Err(e) = self.broker.declare(self.job_type).await {
            warn!(job_type = %self.job_type, "Queue declare failed, will retry on reads: {}", e);
        }

        let claim_task = tokio::spawn(Arc::clone(&self).reclaim_loop(shutdown.clone()));
        let mut failures = FailureTracker::new(3);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let permit = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                permit = Arc::clone(&self.semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match self
                .broker
                .consume(self.job_type, &self.consumer_name, 1, self.block)
                .await
            {
                Ok(deliveries) => {
                    failures.record_success();
                    match deliveries.into_iter().next() {
                        Some(delivery) => self.spawn_delivery(delivery, permit),
                        None => drop(permit),
                    }
                }
                Err(e) => {
                    drop(permit);
                    if failures.record_failure() {
                        error!(job_type = %self.job_type, "Error consuming jobs: {}", e);
                    }
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = tokio::time::sleep(CONSUME_BACKOFF) => {}
                    }
                }
            }
        }

        claim_task.abort();
        info!(job_type = %self.job_type, "Waiting for in-flight jobs to complete...");
        if !self.wait_idle(self.shutdown_timeout).await {
            warn!(
                job_type = %self.job_type,
                "In-flight jobs still running after {:?}; they will be redelivered",
                self.shutdown_timeout
            );
        }
        info!(job_type = %self.job_type, "Consumer stopped");
    }

    /// Wait until no delivery is in flight. `false` on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let all = u32::try_from(self.prefetch).unwrap_or(u32::MAX);
        matches!(
            tokio::time::timeout(timeout, self.semaphore.acquire_many(all)).await,
            Ok(Ok(_))
        )
    }

    fn spawn_delivery(self: &Arc<Self>, delivery: Delivery, permit: OwnedSemaphorePermit) {
        let consumer = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = permit;
            let outcome = consumer.process_delivery(&delivery).await;
            debug!(message_id = %delivery.id, ?outcome, "Delivery processed");
        });
    }

    async fn reclaim_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.claim_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    self.reclaim_stale().await;
                }
            }
        }
    }

    /// Take over deliveries left pending by a crashed or stuck worker.
    pub async fn reclaim_stale(self: &Arc<Self>) -> usize {
        let deliveries = match self
            .broker
            .reclaim(self.job_type, &self.consumer_name, self.claim_min_idle, self.prefetch)
            .await
        {
            Ok(deliveries) => deliveries,
            Err(e) => {
                warn!(job_type = %self.job_type, "Failed to claim pending jobs: {}", e);
                return 0;
            }
        };
        if deliveries.is_empty() {
            return 0;
        }

        let deliveries: Vec<Delivery> = {
            let running = self.running();
            deliveries
                .into_iter()
                .filter(|d| !running.contains(&d.id))
                .collect()
        };
        if deliveries.is_empty() {
            return 0;
        }

        info!(job_type = %self.job_type, count = deliveries.len(), "Claimed pending jobs");
        let mut started = 0;
        for delivery in deliveries {
            let Ok(permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
                break;
            };
            self.spawn_delivery(delivery, permit);
            started += 1;
        }
        started
    }

    fn running(&self) -> MutexGuard<'_, HashSet<String>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_in_flight(&self, id: &str) -> Option<InFlightGuard<'_>> {
        if !self.running().insert(id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            ids: &self.in_flight,
            id: id.to_string(),
        })
    }

    fn heartbeat_interval(&self) -> Duration {
        (self.claim_min_idle / 3).max(MIN_HEARTBEAT)
    }

    /// Run the handler, refreshing the delivery's idle time until it returns.
    async fn execute_with_heartbeat(
        &self,
        delivery: &Delivery,
        message: &QueueMessage,
        reporter: &ProgressReporter,
        logger: &JobLogger,
    ) -> WorkerResult<Option<serde_json::Value>> {
        let execution = self
            .handler
            .execute(message, reporter)
            .instrument(logger.create_span());
        tokio::pin!(execution);

        let mut heartbeat = tokio::time::interval(self.heartbeat_interval());
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                result = &mut execution => return result,
                _ = heartbeat.tick() => {
                    if let Err(e) = self.broker.touch(delivery, &self.consumer_name).await {
                        debug!(message_id = %delivery.id, "Failed to refresh delivery: {}", e);
                    }
                }
            }
        }
    }

    /// Run one delivery through its full lifecycle.
    pub async fn process_delivery(&self, delivery: &Delivery) -> DeliveryOutcome {
        let Some(_in_flight) = self.mark_in_flight(&delivery.id) else {
            debug!(message_id = %delivery.id, "Delivery already running on this consumer");
            return DeliveryOutcome::InFlight;
        };

        let message = match delivery.parse() {
            Ok(message) => message,
            Err(e) => return self.discard_malformed(delivery, e.to_string()).await,
        };

        let attempt = delivery.attempt(self.max_attempts);
        let logger = JobLogger::new(&message.job_id, self.job_type).with_attempt(attempt.value());
        let reporter = ProgressReporter::new(self.store.clone(), message.job_id.clone());

        match reporter.activate().await {
            Ok(true) => {}
            Ok(false) => {
                logger.log_warning("job already terminal, acknowledging redelivery");
                if let Err(e) = self.broker.ack(delivery).await {
                    warn!(message_id = %delivery.id, "Failed to ack stale delivery: {}", e);
                }
                return DeliveryOutcome::Skipped;
            }
            Err(StoreError::NotFound(_)) => {
                logger.log_error("no job record for message");
                if let Err(e) = self.broker.reject(delivery, "job record not found").await {
                    warn!(message_id = %delivery.id, "Failed to reject delivery: {}", e);
                }
                counter!(names::JOBS_DISCARDED, "type" => self.job_type.as_str()).increment(1);
                return DeliveryOutcome::Discarded;
            }
            Err(e) => {
                logger.log_error(&format!("could not activate job, leaving message pending: {}", e));
                return DeliveryOutcome::Deferred;
            }
        }

        logger.log_start(&format!("message {}", delivery.id));
        let started = Instant::now();
        let result = self
            .execute_with_heartbeat(delivery, &message, &reporter, &logger)
            .await;
        histogram!(names::JOB_DURATION_SECONDS, "type" => self.job_type.as_str())
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(value) => match reporter.complete(value).await {
                Ok(_) => {
                    if let Err(e) = self.broker.ack(delivery).await {
                        warn!(message_id = %delivery.id, "Failed to ack completed job: {}", e);
                    }
                    counter!(names::JOBS_COMPLETED, "type" => self.job_type.as_str()).increment(1);
                    logger.log_completion(started.elapsed());
                    DeliveryOutcome::Completed
                }
                Err(e) => {
                    logger.log_error(&format!("could not record completion, leaving message pending: {}", e));
                    DeliveryOutcome::Deferred
                }
            },
            Err(err) => {
                logger.log_error(&format!("{} ({})", err, err.class().as_str()));
                match self
                    .retry
                    .handle_failure(delivery, &message, &reporter, &err)
                    .await
                {
                    RetryOutcome::Requeued(next) => DeliveryOutcome::Requeued(next),
                    RetryOutcome::Discarded => DeliveryOutcome::Discarded,
                    RetryOutcome::Deferred => DeliveryOutcome::Deferred,
                }
            }
        }
    }

    /// Malformed messages are dead-lettered at once and never republished.
    async fn discard_malformed(&self, delivery: &Delivery, reason: String) -> DeliveryOutcome {
        warn!(
            message_id = %delivery.id,
            job_type = %self.job_type,
            "Discarding malformed message: {}", reason
        );

        if let Some(job_id) = delivery.salvage_job_id() {
            let error = format!("malformed message: {}", reason);
            match self.store.transition(&job_id, Transition::Fail(error)).await {
                Ok(_) | Err(StoreError::NotFound(_)) => {}
                Err(e) => warn!(job_id = %job_id, "Failed to fail job for malformed message: {}", e),
            }
        }

        if let Err(e) = self.broker.reject(delivery, &reason).await {
            warn!(message_id = %delivery.id, "Failed to reject malformed message: {}", e);
        }
        counter!(names::JOBS_DISCARDED, "type" => self.job_type.as_str()).increment(1);
        DeliveryOutcome::Discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use reel_models::{Job, JobId, JobStatus, Product, ProductId, ProductStatus, TemplateId, VideoTemplate};
    use reel_queue::{
        ContentGenerationJob, JobPayload, JobProducer, MemoryBroker, QueueMessage, RETRY_HEADER,
    };
    use reel_services::ServiceError;
    use reel_store::{MemoryStore, ProductStore};

    use crate::config::CompositionConfig;
    use crate::error::{WorkerError, WorkerResult};
    use crate::handlers::Handlers;

    /// Handler with a fixed response that counts its calls.
    struct Scripted {
        calls: AtomicU32,
        respond: fn() -> WorkerResult<Option<serde_json::Value>>,
    }

    impl Scripted {
        fn new(respond: fn() -> WorkerResult<Option<serde_json::Value>>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                respond,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JobHandler for Scripted {
        async fn execute(
            &self,
            _message: &QueueMessage,
            reporter: &ProgressReporter,
        ) -> WorkerResult<Option<serde_json::Value>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            reporter.report(30).await;
            (self.respond)()
        }
    }

    fn transient() -> WorkerResult<Option<serde_json::Value>> {
        Err(WorkerError::Service(ServiceError::Timeout {
            service: "text",
            secs: 60,
        }))
    }

    struct Harness {
        store: Arc<MemoryStore>,
        broker: Arc<MemoryBroker>,
        producer: JobProducer,
        consumer: Arc<WorkerConsumer>,
    }

    fn harness(job_type: JobType, handler: Arc<dyn JobHandler>) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let broker = Arc::new(MemoryBroker::new());
        let config = WorkerConfig {
            block: Duration::from_millis(10),
            ..Default::default()
        };
        let producer = JobProducer::new(store.clone(), broker.clone()).with_max_attempts(config.max_attempts);
        let consumer = Arc::new(WorkerConsumer::new(
            job_type,
            &config,
            broker.clone(),
            store.clone(),
            handler,
        ));
        Harness {
            store,
            broker,
            producer,
            consumer,
        }
    }

    fn content_payload(product: &str) -> JobPayload {
        JobPayload::ContentGeneration(ContentGenerationJob {
            product_id: ProductId::from_string(product),
        })
    }

    async fn next_delivery(h: &Harness, job_type: JobType) -> Option<Delivery> {
        h.broker
            .consume(job_type, h.consumer.consumer_name(), 1, Duration::ZERO)
            .await
            .unwrap()
            .into_iter()
            .next()
    }

    #[tokio::test]
    async fn test_success_completes_then_acks() {
        let handler = Scripted::new(|| Ok(Some(serde_json::json!({"key_points": 3}))));
        let h = harness(JobType::ContentGeneration, handler.clone());
        h.store
            .put_product(&Product::new(ProductId::from_string("p1"), "Lamp"))
            .await
            .unwrap();
        let id = h.producer.enqueue(content_payload("p1"), 2).await.unwrap();

        let delivery = next_delivery(&h, JobType::ContentGeneration).await.unwrap();
        assert_eq!(h.consumer.process_delivery(&delivery).await, DeliveryOutcome::Completed);

        let job = h.store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.result.unwrap()["key_points"], 3);
        assert_eq!(h.broker.acked().await, vec![delivery.id]);
        assert_eq!(h.broker.pending_len().await, 0);

        let product = h.store.get_product(&ProductId::from_string("p1")).await.unwrap().unwrap();
        assert_eq!(product.status, ProductStatus::ContentReady);
    }

    #[tokio::test]
    async fn test_deterministic_failure_retried_max_attempts() {
        let handler = Scripted::new(transient);
        let h = harness(JobType::ContentGeneration, handler.clone());
        let id = h.producer.enqueue(content_payload("p1"), 0).await.unwrap();

        let mut outcomes = Vec::new();
        while let Some(delivery) = next_delivery(&h, JobType::ContentGeneration).await {
            let outcome = h.consumer.process_delivery(&delivery).await;
            let job = h.store.get(&id).await.unwrap().unwrap();
            match outcome {
                DeliveryOutcome::Requeued(_) => assert_eq!(job.status, JobStatus::Waiting),
                DeliveryOutcome::Discarded => assert_eq!(job.status, JobStatus::Failed),
                other => panic!("unexpected outcome {other:?}"),
            }
            outcomes.push(outcome);
        }

        assert_eq!(handler.calls(), 4);
        assert_eq!(
            outcomes,
            vec![
                DeliveryOutcome::Requeued(Attempt::from_header(Some("1"), 3)),
                DeliveryOutcome::Requeued(Attempt::from_header(Some("2"), 3)),
                DeliveryOutcome::Requeued(Attempt::from_header(Some("3"), 3)),
                DeliveryOutcome::Discarded,
            ]
        );

        let headers: Vec<String> = h
            .broker
            .published()
            .await
            .iter()
            .map(|d| d.fields[RETRY_HEADER].clone())
            .collect();
        assert_eq!(headers, vec!["0", "1", "2", "3"]);

        let job = h.store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 4);
        assert!(job.error.as_deref().is_some_and(|e| e.contains("timed out")));
        assert!(job.completed_at.is_some());
        assert_eq!(h.broker.dead_letters().await.len(), 1);
        assert_eq!(h.broker.pending_len().await, 0);
    }

    #[tokio::test]
    async fn test_malformed_message_never_retried() {
        let handler = Scripted::new(|| Ok(None));
        let h = harness(JobType::VideoComposition, handler.clone());
        h.broker
            .push_raw(JobType::VideoComposition, &[("body", "\u{1}\u{2}garbage"), (RETRY_HEADER, "0")])
            .await;

        let delivery = next_delivery(&h, JobType::VideoComposition).await.unwrap();
        assert_eq!(h.consumer.process_delivery(&delivery).await, DeliveryOutcome::Discarded);

        assert_eq!(handler.calls(), 0);
        assert!(h.broker.published().await.is_empty());
        assert_eq!(h.broker.dead_letters().await.len(), 1);
        assert_eq!(h.broker.ready_len(JobType::VideoComposition).await, 0);
        assert_eq!(h.broker.pending_len().await, 0);
    }

    #[tokio::test]
    async fn test_malformed_message_with_job_id_fails_record() {
        let handler = Scripted::new(|| Ok(None));
        let h = harness(JobType::ContentGeneration, handler.clone());
        let job = Job::new(JobType::ContentGeneration, ProductId::from_string("p1"), 0);
        h.store.insert(&job).await.unwrap();

        let body = format!(r#"{{"jobId":"{}","type":"content_generation"}}"#, job.id);
        h.broker
            .push_raw(JobType::ContentGeneration, &[("body", body.as_str())])
            .await;
        let delivery = next_delivery(&h, JobType::ContentGeneration).await.unwrap();
        assert_eq!(h.consumer.process_delivery(&delivery).await, DeliveryOutcome::Discarded);

        let stored = h.store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.error.unwrap().starts_with("malformed message"));
        assert!(h.broker.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_not_found_is_terminal_on_first_failure() {
        let handler = Scripted::new(|| Err(WorkerError::not_found("product p1")));
        let h = harness(JobType::ContentGeneration, handler.clone());
        let id = h.producer.enqueue(content_payload("p1"), 0).await.unwrap();

        let delivery = next_delivery(&h, JobType::ContentGeneration).await.unwrap();
        assert_eq!(h.consumer.process_delivery(&delivery).await, DeliveryOutcome::Discarded);
        assert_eq!(h.broker.published().await.len(), 1);
        assert_eq!(h.store.get(&id).await.unwrap().unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_redelivery_of_terminal_job_is_skipped() {
        let handler = Scripted::new(|| Ok(None));
        let h = harness(JobType::ContentGeneration, handler.clone());
        let id = h.producer.enqueue(content_payload("p1"), 0).await.unwrap();

        let delivery = next_delivery(&h, JobType::ContentGeneration).await.unwrap();
        h.consumer.process_delivery(&delivery).await;

        // Same message seen again, as after a lost ack.
        assert_eq!(h.consumer.process_delivery(&delivery).await, DeliveryOutcome::Skipped);
        assert_eq!(handler.calls(), 1);
        assert_eq!(h.store.get(&id).await.unwrap().unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_message_without_record_is_discarded() {
        let handler = Scripted::new(|| Ok(None));
        let h = harness(JobType::ContentGeneration, handler.clone());
        let message = QueueMessage::new(JobId::from_string("ghost"), content_payload("p1"));
        h.broker.publish(&message, 0, Attempt::initial()).await.unwrap();

        let delivery = next_delivery(&h, JobType::ContentGeneration).await.unwrap();
        assert_eq!(h.consumer.process_delivery(&delivery).await, DeliveryOutcome::Discarded);
        assert_eq!(handler.calls(), 0);
    }

    #[tokio::test]
    async fn test_composition_without_images_ends_failed() {
        let work = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store
            .put_template(VideoTemplate::new(TemplateId::from_string("t1"), "Promo"))
            .await;
        store
            .put_product(&Product::new(ProductId::from_string("p1"), "Lamp"))
            .await
            .unwrap();

        let composer = crate::composition::VideoComposer::new(
            store.clone(),
            Arc::new(reel_storage::LocalStorage::new(out.path())),
            CompositionConfig::default(),
            work.path(),
        );
        let handlers = Handlers::new(store.clone(), Default::default(), composer);
        let broker = Arc::new(MemoryBroker::new());
        let config = WorkerConfig::default();
        let consumer = WorkerConsumer::new(
            JobType::VideoComposition,
            &config,
            broker.clone(),
            store.clone(),
            Arc::new(handlers),
        );
        let producer = JobProducer::new(store.clone(), broker.clone());

        let payload = JobPayload::VideoComposition(reel_models::CompositionRequest::new(
            ProductId::from_string("p1"),
            TemplateId::from_string("t1"),
        ));
        let id = producer.enqueue(payload, 0).await.unwrap();
        let delivery = broker
            .consume(JobType::VideoComposition, "c", 1, Duration::ZERO)
            .await
            .unwrap()
            .remove(0);

        assert_eq!(consumer.process_delivery(&delivery).await, DeliveryOutcome::Discarded);

        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("no images"));
        assert_eq!(broker.published().await.len(), 1);
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
        assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);

        let product = store.get_product(&ProductId::from_string("p1")).await.unwrap().unwrap();
        assert_eq!(product.status, ProductStatus::Failed);
        assert!(product.video.is_none());
    }

    #[tokio::test]
    async fn test_run_loop_processes_and_shuts_down() {
        let handler = Scripted::new(|| Ok(None));
        let h = harness(JobType::ContentGeneration, handler.clone());
        let id = h.producer.enqueue(content_payload("p1"), 0).await.unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let run = tokio::spawn(Arc::clone(&h.consumer).run(shutdown_rx));

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let job = h.store.get(&id).await.unwrap().unwrap();
            if job.status == JobStatus::Completed {
                break;
            }
            assert!(Instant::now() < deadline, "job did not complete");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap();
        assert!(h.consumer.wait_idle(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_reclaim_runs_stale_deliveries() {
        let handler = Scripted::new(|| Ok(None));
        let store = Arc::new(MemoryStore::new());
        let broker = Arc::new(MemoryBroker::new());
        let config = WorkerConfig {
            claim_min_idle: Duration::ZERO,
            ..Default::default()
        };
        let consumer = Arc::new(WorkerConsumer::new(
            JobType::ContentGeneration,
            &config,
            broker.clone(),
            store.clone(),
            handler.clone(),
        ));
        let id = JobProducer::new(store.clone(), broker.clone())
            .enqueue(content_payload("p1"), 0)
            .await
            .unwrap();

        // A worker that crashed after reading.
        broker
            .consume(JobType::ContentGeneration, "crashed", 1, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(consumer.reclaim_stale().await, 1);
        assert!(consumer.wait_idle(Duration::from_secs(5)).await);
        assert_eq!(store.get(&id).await.unwrap().unwrap().status, JobStatus::Completed);
    }

    /// Handler that fails transiently after a delay.
    struct SlowFailure {
        calls: AtomicU32,
        delay: Duration,
    }

    #[async_trait]
    impl JobHandler for SlowFailure {
        async fn execute(
            &self,
            _message: &QueueMessage,
            _reporter: &ProgressReporter,
        ) -> WorkerResult<Option<serde_json::Value>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            transient()
        }
    }

    fn slow_harness(claim_min_idle: Duration) -> (Harness, Arc<SlowFailure>) {
        let handler = Arc::new(SlowFailure {
            calls: AtomicU32::new(0),
            delay: Duration::from_millis(300),
        });
        let store = Arc::new(MemoryStore::new());
        let broker = Arc::new(MemoryBroker::new());
        let config = WorkerConfig {
            claim_min_idle,
            ..Default::default()
        };
        let producer = JobProducer::new(store.clone(), broker.clone()).with_max_attempts(config.max_attempts);
        let consumer = Arc::new(WorkerConsumer::new(
            JobType::ContentGeneration,
            &config,
            broker.clone(),
            store.clone(),
            handler.clone(),
        ));
        (
            Harness {
                store,
                broker,
                producer,
                consumer,
            },
            handler,
        )
    }

    #[tokio::test]
    async fn test_reclaim_skips_delivery_running_here() {
        let (h, handler) = slow_harness(Duration::ZERO);
        let id = h.producer.enqueue(content_payload("p1"), 0).await.unwrap();
        let delivery = next_delivery(&h, JobType::ContentGeneration).await.unwrap();

        let consumer = Arc::clone(&h.consumer);
        let running = tokio::spawn(async move { consumer.process_delivery(&delivery).await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(h.consumer.reclaim_stale().await, 0);

        assert_eq!(
            running.await.unwrap(),
            DeliveryOutcome::Requeued(Attempt::from_header(Some("1"), 3))
        );
        assert!(h.consumer.wait_idle(Duration::from_secs(1)).await);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.broker.published().await.len(), 2);

        let job = h.store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test]
    async fn test_long_delivery_stays_claimed_past_min_idle() {
        let (h, handler) = slow_harness(Duration::from_millis(50));
        h.producer.enqueue(content_payload("p1"), 0).await.unwrap();
        let delivery = next_delivery(&h, JobType::ContentGeneration).await.unwrap();

        let consumer = Arc::clone(&h.consumer);
        let running = tokio::spawn(async move { consumer.process_delivery(&delivery).await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Another worker's reclaim sees a fresh idle time.
        assert!(h
            .broker
            .reclaim(JobType::ContentGeneration, "other-worker", Duration::from_millis(50), 10)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(h.consumer.reclaim_stale().await, 0);

        assert!(matches!(running.await.unwrap(), DeliveryOutcome::Requeued(_)));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.broker.published().await.len(), 2);
    }

    #[tokio::test]
    async fn test_same_delivery_twice_runs_once() {
        let (h, handler) = slow_harness(Duration::from_secs(300));
        h.producer.enqueue(content_payload("p1"), 0).await.unwrap();
        let delivery = next_delivery(&h, JobType::ContentGeneration).await.unwrap();

        let (first, second) = tokio::join!(
            h.consumer.process_delivery(&delivery),
            h.consumer.process_delivery(&delivery)
        );
        let mut outcomes = [first, second];
        outcomes.sort_by_key(|o| matches!(o, DeliveryOutcome::InFlight));
        assert!(matches!(outcomes[0], DeliveryOutcome::Requeued(_)));
        assert_eq!(outcomes[1], DeliveryOutcome::InFlight);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }
}
