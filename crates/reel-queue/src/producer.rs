//! Job producer: deduplicate, record, publish.

use std::sync::Arc;

use metrics::counter;
use tracing::{info, warn};

use reel_models::{Job, JobId, DEFAULT_MAX_ATTEMPTS};
use reel_store::{InsertOutcome, JobStore, Transition};

use crate::broker::Broker;
use crate::error::EnqueueError;
use crate::message::{Attempt, JobPayload, QueueMessage};
use crate::metrics::names;

/// Creates job records and publishes their first message.
#[derive(Clone)]
pub struct JobProducer {
    store: Arc<dyn JobStore>,
    broker: Arc<dyn Broker>,
    max_attempts: u32,
}

impl JobProducer {
    pub fn new(store: Arc<dyn JobStore>, broker: Arc<dyn Broker>) -> Self {
        Self {
            store,
            broker,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn is_available(&self) -> bool {
        self.broker.is_available()
    }

    /// Enqueue a job for asynchronous execution.
    ///
    /// Rejects with `Duplicate` when a waiting or active job exists for the
    /// same (subject, type), and with `Degraded` when the broker is down.
    pub async fn enqueue(&self, payload: JobPayload, priority: u8) -> Result<JobId, EnqueueError> {
        let job_type = payload.job_type();
        let job = self.create_record(&payload, priority, true).await?;

        let message = QueueMessage::new(job.id.clone(), payload);
        match self
            .broker
            .publish(&message, job.priority, Attempt::initial())
            .await
        {
            Ok(message_id) => {
                counter!(names::JOBS_ENQUEUED, "type" => job_type.as_str()).increment(1);
                info!(
                    job_id = %job.id,
                    job_type = %job_type,
                    subject = %job.subject_id,
                    message_id = %message_id,
                    "Job enqueued"
                );
                Ok(job.id)
            }
            Err(e) => {
                // Close the record so it does not block later requests.
                let reason = format!("enqueue failed: {}", e);
                if let Err(store_err) = self.store.transition(&job.id, Transition::Fail(reason)).await {
                    warn!(job_id = %job.id, "Failed to close unpublished job: {}", store_err);
                }
                if e.is_connection_error() {
                    Err(EnqueueError::Degraded)
                } else {
                    Err(EnqueueError::Queue(e))
                }
            }
        }
    }

    /// Record a job that will run inline instead of through the queue.
    pub async fn record_inline(&self, payload: &JobPayload, priority: u8) -> Result<Job, EnqueueError> {
        self.create_record(payload, priority, false).await
    }

    async fn create_record(
        &self,
        payload: &JobPayload,
        priority: u8,
        require_broker: bool,
    ) -> Result<Job, EnqueueError> {
        let job_type = payload.job_type();
        let subject = payload.subject_id();

        if let Some(existing) = self.store.find_open(subject, job_type).await? {
            counter!(names::JOBS_DUPLICATE, "type" => job_type.as_str()).increment(1);
            info!(existing = %existing.id, job_type = %job_type, subject = %subject, "Duplicate job rejected");
            return Err(EnqueueError::Duplicate {
                existing: existing.id,
            });
        }

        if require_broker && !self.broker.is_available() {
            warn!(job_type = %job_type, subject = %subject, "Queue degraded, enqueue rejected");
            return Err(EnqueueError::Degraded);
        }

        let job = Job::new(job_type, subject.clone(), priority).with_max_attempts(self.max_attempts);
        match self.store.insert(&job).await? {
            InsertOutcome::Created => Ok(job),
            // Lost a race with a concurrent request between the check and the insert.
            InsertOutcome::Duplicate(existing) => {
                counter!(names::JOBS_DUPLICATE, "type" => job_type.as_str()).increment(1);
                Err(EnqueueError::Duplicate { existing })
            }
        }
    }
}
