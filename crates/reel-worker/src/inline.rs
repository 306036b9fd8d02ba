//! Inline execution when the queue is degraded.
//!
//! The job still gets a record, so status queries and duplicate checks
//! behave the same as for queued jobs. Only the transport is skipped.

use std::sync::Arc;
use std::time::Instant;

use metrics::counter;
use tracing::Instrument;

use reel_models::{Job, JobType};
use reel_queue::metrics::names;
use reel_queue::{EnqueueError, JobPayload, JobProducer, QueueMessage};
use reel_store::{JobStore, StoreError};

use crate::handlers::JobHandler;
use crate::logging::JobLogger;
use crate::progress::ProgressReporter;

/// Job types that may run inside a request. Rendering is never one of them.
pub fn runs_inline(job_type: JobType) -> bool {
    matches!(job_type, JobType::ContentGeneration)
}

/// Runs jobs in the caller's task.
#[derive(Clone)]
pub struct InlineExecutor {
    producer: JobProducer,
    store: Arc<dyn JobStore>,
    handler: Arc<dyn JobHandler>,
}

impl InlineExecutor {
    pub fn new(producer: JobProducer, store: Arc<dyn JobStore>, handler: Arc<dyn JobHandler>) -> Self {
        Self {
            producer,
            store,
            handler,
        }
    }

    /// Record, run and finish a job. Returns the terminal record.
    ///
    /// Handler failures are recorded on the job rather than returned.
    pub async fn execute(&self, payload: JobPayload, priority: u8) -> Result<Job, EnqueueError> {
        let job = self.producer.record_inline(&payload, priority).await?;
        let job_type = job.job_type;
        let logger = JobLogger::new(&job.id, job_type).with_attempt(0);
        let reporter = ProgressReporter::new(self.store.clone(), job.id.clone());
        reporter.activate().await?;

        logger.log_start("inline execution");
        let started = Instant::now();
        let message = QueueMessage::new(job.id.clone(), payload);
        let result = self
            .handler
            .execute(&message, &reporter)
            .instrument(logger.create_span())
            .await;
        counter!(names::JOBS_INLINE, "type" => job_type.as_str()).increment(1);

        match result {
            Ok(value) => {
                reporter.complete(value).await?;
                logger.log_completion(started.elapsed());
            }
            Err(err) => {
                logger.log_error(&err.to_string());
                reporter.fail(&err.job_error()).await?;
            }
        }

        self.store
            .get(&job.id)
            .await?
            .ok_or_else(|| EnqueueError::Store(StoreError::not_found(format!("job {}", job.id))))
    }
}
