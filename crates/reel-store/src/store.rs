//! Store traits shared by the Redis and in-memory backends.

use async_trait::async_trait;

use reel_models::{
    CompositionOutput, GeneratedContent, ImageRef, ImageSource, Job, JobId, JobStatus, JobType,
    MusicId, MusicTrack, Product, ProductId, StatusCounts, TemplateId, VideoTemplate,
};

use crate::error::StoreResult;

/// A state change applied to a job record and mirrored onto its product.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Attempt started: status active, attempts + 1, started_at set.
    Activate,
    /// Progress checkpoint. Ignored unless active and higher than the stored value.
    Progress(u8),
    /// Handler succeeded.
    Complete(Option<serde_json::Value>),
    /// Attempt failed and a retry has been scheduled: back to waiting.
    Retry(String),
    /// Terminal failure.
    Fail(String),
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Activate => "activate",
            Transition::Progress(_) => "progress",
            Transition::Complete(_) => "complete",
            Transition::Retry(_) => "retry",
            Transition::Fail(_) => "fail",
        }
    }

    /// Job status after this transition.
    pub fn target_status(&self) -> JobStatus {
        match self {
            Transition::Activate | Transition::Progress(_) => JobStatus::Active,
            Transition::Complete(_) => JobStatus::Completed,
            Transition::Retry(_) => JobStatus::Waiting,
            Transition::Fail(_) => JobStatus::Failed,
        }
    }
}

/// Result of inserting a new job record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Created,
    /// Another non-terminal job for the same (subject, type) already exists.
    Duplicate(JobId),
}

/// Durable job records. Source of truth independent of the broker.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Non-terminal job for (subject, type), if any.
    async fn find_open(&self, subject: &ProductId, job_type: JobType) -> StoreResult<Option<Job>>;

    /// Insert a waiting job unless an open one exists for the same (subject, type).
    async fn insert(&self, job: &Job) -> StoreResult<InsertOutcome>;

    async fn get(&self, id: &JobId) -> StoreResult<Option<Job>>;

    /// Apply a transition to the job and its product in one step.
    ///
    /// Returns `false` when the transition was not applicable (terminal job,
    /// stale progress). Missing jobs are `StoreError::NotFound`.
    async fn transition(&self, id: &JobId, transition: Transition) -> StoreResult<bool>;

    async fn counts(&self, job_type: JobType) -> StoreResult<StatusCounts>;

    /// Reachability check for readiness probes.
    async fn ping(&self) -> StoreResult<()>;
}

/// Products plus the read-only template and music catalogues.
#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn get_product(&self, id: &ProductId) -> StoreResult<Option<Product>>;

    async fn put_product(&self, product: &Product) -> StoreResult<()>;

    async fn save_content(&self, id: &ProductId, content: &GeneratedContent) -> StoreResult<()>;

    /// Append images under a source. Returns how many were new.
    async fn add_images(
        &self,
        id: &ProductId,
        source: ImageSource,
        refs: &[ImageRef],
    ) -> StoreResult<usize>;

    async fn save_video(&self, id: &ProductId, output: &CompositionOutput) -> StoreResult<()>;

    async fn get_template(&self, id: &TemplateId) -> StoreResult<Option<VideoTemplate>>;

    async fn get_music(&self, id: &MusicId) -> StoreResult<Option<MusicTrack>>;
}
