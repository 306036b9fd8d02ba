//! Redis key layout.

use reel_models::{JobId, JobStatus, JobType, MusicId, ProductId, TemplateId};

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Redis URL for job and product records
    pub redis_url: String,
    /// Key prefix shared with the queue
    pub prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            prefix: "reel".to_string(),
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables.
    ///
    /// `STORE_REDIS_URL` lets records live on a different instance than the
    /// broker so status queries survive a broker outage.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("STORE_REDIS_URL")
                .or_else(|_| std::env::var("REDIS_URL"))
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            prefix: std::env::var("QUEUE_PREFIX").unwrap_or_else(|_| "reel".to_string()),
        }
    }
}

/// Builds every key the store touches.
#[derive(Debug, Clone)]
pub struct Keys {
    prefix: String,
}

impl Keys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn job(&self, id: &JobId) -> String {
        format!("{}{}", self.job_prefix(), id)
    }

    pub fn job_prefix(&self) -> String {
        format!("{}:job:", self.prefix)
    }

    /// Holds the id of the single non-terminal job for (type, subject).
    pub fn open(&self, job_type: JobType, subject: &ProductId) -> String {
        format!("{}:open:{}:{}", self.prefix, job_type, subject)
    }

    /// Prefix of the per-status index sets; the status name is appended.
    pub fn status_prefix(&self, job_type: JobType) -> String {
        format!("{}:status:{}:", self.prefix, job_type)
    }

    pub fn status(&self, job_type: JobType, status: JobStatus) -> String {
        format!("{}{}", self.status_prefix(job_type), status)
    }

    pub fn product(&self, id: &ProductId) -> String {
        format!("{}:product:{}", self.prefix, id)
    }

    pub fn template(&self, id: &TemplateId) -> String {
        format!("{}:template:{}", self.prefix, id)
    }

    pub fn music(&self, id: &MusicId) -> String {
        format!("{}:music:{}", self.prefix, id)
    }
}
