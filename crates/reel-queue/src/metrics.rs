//! Metric names shared by the API and the worker.

pub mod names {
    pub const JOBS_ENQUEUED: &str = "reel_jobs_enqueued_total";
    pub const JOBS_DUPLICATE: &str = "reel_jobs_duplicate_total";
    pub const JOBS_COMPLETED: &str = "reel_jobs_completed_total";
    pub const JOBS_FAILED: &str = "reel_jobs_failed_total";
    pub const JOBS_RETRIED: &str = "reel_jobs_retried_total";
    pub const JOBS_DISCARDED: &str = "reel_jobs_discarded_total";
    pub const JOBS_INLINE: &str = "reel_jobs_inline_total";
    pub const JOB_DURATION_SECONDS: &str = "reel_job_duration_seconds";
    pub const RENDER_SECONDS: &str = "reel_composition_render_seconds";
    pub const BROKER_AVAILABLE: &str = "reel_broker_available";
}
