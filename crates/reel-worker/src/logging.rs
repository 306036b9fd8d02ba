//! Structured job logging.
//!
//! Every lifecycle line carries the same `job_id`, `job_type` and
//! `attempt` fields so a job can be followed across retries.

use std::time::Duration;

use tracing::{error, info, warn, Span};

use reel_models::{JobId, JobType};

/// Job logger with consistent contextual fields.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    job_type: JobType,
    attempt: u32,
}

impl JobLogger {
    pub fn new(job_id: &JobId, job_type: JobType) -> Self {
        Self {
            job_id: job_id.to_string(),
            job_type,
            attempt: 0,
        }
    }

    /// Attach the retry counter carried by the message.
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            job_type = %self.job_type,
            attempt = self.attempt,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            job_type = %self.job_type,
            attempt = self.attempt,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            job_type = %self.job_type,
            attempt = self.attempt,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            job_type = %self.job_type,
            attempt = self.attempt,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, elapsed: Duration) {
        info!(
            job_id = %self.job_id,
            job_type = %self.job_type,
            attempt = self.attempt,
            elapsed_ms = elapsed.as_millis() as u64,
            "Job completed"
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    /// Span wrapping one handler execution.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            job_type = %self.job_type,
            attempt = self.attempt
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_fields() {
        let job_id = JobId::from_string("job-1");
        let logger = JobLogger::new(&job_id, JobType::VideoComposition).with_attempt(2);

        assert_eq!(logger.job_id(), "job-1");
        assert_eq!(logger.job_type(), JobType::VideoComposition);
        assert_eq!(logger.attempt, 2);
    }
}
