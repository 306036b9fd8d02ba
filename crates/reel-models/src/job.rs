//! Job records tracked by the job record store.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::product::ProductId;

/// Attempts allowed before a failing job becomes terminal.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of asynchronous work. Each variant has its own durable queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Generate caption, hashtags, description and key points
    ContentGeneration,
    /// Find or generate product images
    MediaAcquisition,
    /// Render the product video
    VideoComposition,
}

impl JobType {
    pub const ALL: &'static [JobType] = &[
        JobType::ContentGeneration,
        JobType::MediaAcquisition,
        JobType::VideoComposition,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::ContentGeneration => "content_generation",
            JobType::MediaAcquisition => "media_acquisition",
            JobType::VideoComposition => "video_composition",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown job type.
#[derive(Debug, Clone, Error)]
#[error("unsupported job type: {0}")]
pub struct ParseJobTypeError(pub String);

impl FromStr for JobType {
    type Err = ParseJobTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "content_generation" => Ok(JobType::ContentGeneration),
            "media_acquisition" => Ok(JobType::MediaAcquisition),
            "video_composition" => Ok(JobType::VideoComposition),
            _ => Err(ParseJobTypeError(s.to_string())),
        }
    }
}

/// Job status in the record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the queue (initial delivery or a pending retry)
    #[default]
    Waiting,
    /// Being processed by a worker
    Active,
    /// Completed successfully
    Completed,
    /// Failed permanently
    Failed,
}

impl JobStatus {
    pub const ALL: &'static [JobStatus] = &[
        JobStatus::Waiting,
        JobStatus::Active,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Terminal jobs never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobStatus::Waiting),
            "active" => Ok(JobStatus::Active),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Durable record of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Job type
    pub job_type: JobType,

    /// Product this job acts upon
    pub subject_id: ProductId,

    /// Priority (0 = lowest, 10 = highest)
    #[serde(default)]
    pub priority: u8,

    /// Number of times a worker has started this job
    #[serde(default)]
    pub attempts: u32,

    /// Attempts allowed before terminal failure
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Current status
    #[serde(default)]
    pub status: JobStatus,

    /// Progress (0-100)
    #[serde(default)]
    pub progress: u8,

    /// Last error message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Handler result
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<std::collections::HashMap<String, String>>")]
    pub result: Option<serde_json::Value>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// When the latest attempt started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// When the job reached a terminal status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl Job {
    /// Create a new waiting job.
    pub fn new(job_type: JobType, subject_id: ProductId, priority: u8) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            job_type,
            subject_id,
            priority: priority.min(10),
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            status: JobStatus::Waiting,
            progress: 0,
            error: None,
            result: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Set the attempt bound.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// True while the job blocks duplicates for its (subject, type).
    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Start an attempt. Returns false if the job is already terminal.
    pub fn start(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let now = Utc::now();
        self.status = JobStatus::Active;
        self.attempts += 1;
        self.started_at = Some(now);
        self.updated_at = now;
        true
    }

    /// Raise progress. Progress never moves backwards and only changes while active.
    pub fn set_progress(&mut self, progress: u8) -> bool {
        let progress = progress.min(100);
        if self.status != JobStatus::Active || progress <= self.progress {
            return false;
        }
        self.progress = progress;
        self.updated_at = Utc::now();
        true
    }

    /// Mark job as completed.
    pub fn complete(&mut self, result: Option<serde_json::Value>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let now = Utc::now();
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.result = result;
        self.error = None;
        self.completed_at = Some(now);
        self.updated_at = now;
        true
    }

    /// Put the job back to waiting after a failed attempt that will be retried.
    pub fn requeue(&mut self, error: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = JobStatus::Waiting;
        self.error = Some(error.into());
        self.updated_at = Utc::now();
        true
    }

    /// Mark job as permanently failed.
    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let now = Utc::now();
        let error = error.into();
        self.status = JobStatus::Failed;
        self.error = Some(if error.trim().is_empty() {
            "unknown error".to_string()
        } else {
            error
        });
        self.completed_at = Some(now);
        self.updated_at = now;
        true
    }
}

/// Per-type job counts for the status query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StatusCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub total: u64,
}

impl StatusCounts {
    /// Count one job with the given status.
    pub fn record(&mut self, status: JobStatus) {
        self.add(status, 1);
    }

    /// Add `n` jobs with the given status.
    pub fn add(&mut self, status: JobStatus, n: u64) {
        match status {
            JobStatus::Waiting => self.waiting += n,
            JobStatus::Active => self.active += n,
            JobStatus::Completed => self.completed += n,
            JobStatus::Failed => self.failed += n,
        }
        self.total += n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(JobType::VideoComposition, ProductId::from_string("p1"), 5)
    }

    #[test]
    fn test_job_creation() {
        let job = job();
        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, 3);
        assert!(job.is_open());
    }

    #[test]
    fn test_job_state_transitions() {
        let mut job = job();

        assert!(job.start());
        assert_eq!(job.status, JobStatus::Active);
        assert_eq!(job.attempts, 1);
        assert!(job.started_at.is_some());

        assert!(job.set_progress(40));
        assert!(!job.set_progress(30), "progress must not go backwards");
        assert_eq!(job.progress, 40);

        assert!(job.complete(Some(serde_json::json!({"ok": true}))));
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(!job.start(), "terminal jobs cannot restart");
    }

    #[test]
    fn test_requeue_then_fail() {
        let mut job = job();
        job.start();
        assert!(job.requeue("timeout"));
        assert_eq!(job.status, JobStatus::Waiting);
        assert!(job.is_open());

        job.start();
        assert_eq!(job.attempts, 2);
        assert!(job.fail(""));
        assert_eq!(job.error.as_deref(), Some("unknown error"));
        assert!(!job.is_open());
    }

    #[test]
    fn test_job_type_parsing() {
        assert_eq!("content-generation".parse::<JobType>().unwrap(), JobType::ContentGeneration);
        assert_eq!("video_composition".parse::<JobType>().unwrap(), JobType::VideoComposition);
        assert!("transcode".parse::<JobType>().is_err());
    }

    #[test]
    fn test_status_counts() {
        let mut counts = StatusCounts::default();
        counts.record(JobStatus::Waiting);
        counts.record(JobStatus::Failed);
        counts.add(JobStatus::Completed, 3);
        assert_eq!(counts.total, 5);
        assert_eq!(counts.completed, 3);
    }
}
