//! Progress reporter: the single writer of job status and progress.
//!
//! Every call goes through `JobStore::transition`, which updates the job
//! record and the product mirror together.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use reel_models::JobId;
use reel_store::{JobStore, StoreResult, Transition};

/// Fixed checkpoints of the composition pipeline.
pub mod checkpoints {
    use super::ProgressBand;

    /// Job picked up by a worker
    pub const STARTED: u8 = 5;
    /// Template, images and content resolved
    pub const INPUTS_RESOLVED: u8 = 10;
    /// One frame per scene
    pub const FRAMES: ProgressBand = ProgressBand::new(10, 50);
    /// Encoder progress
    pub const ENCODE: ProgressBand = ProgressBand::new(50, 90);
    pub const THUMBNAIL: u8 = 92;
    pub const PERSISTED: u8 = 95;
}

/// A slice of the job's 0..=100 range reserved for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressBand {
    pub lo: u8,
    pub hi: u8,
}

impl ProgressBand {
    pub const fn new(lo: u8, hi: u8) -> Self {
        Self { lo, hi }
    }

    /// Map stage-local percent onto the band.
    pub fn map(&self, local: u8) -> u8 {
        let local = u32::from(local.min(100));
        let span = u32::from(self.hi.saturating_sub(self.lo));
        self.lo + (span * local / 100) as u8
    }

    /// Position after `done` of `total` steps.
    pub fn step(&self, done: usize, total: usize) -> u8 {
        if total == 0 {
            return self.hi;
        }
        let local = (done.min(total) * 100 / total) as u8;
        self.map(local)
    }
}

/// Reports lifecycle transitions and progress for one job.
#[derive(Clone)]
pub struct ProgressReporter {
    store: Arc<dyn JobStore>,
    job_id: JobId,
}

impl ProgressReporter {
    pub fn new(store: Arc<dyn JobStore>, job_id: JobId) -> Self {
        Self { store, job_id }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Mark the job active and record the start checkpoint. `false` when
    /// the job is already terminal.
    pub async fn activate(&self) -> StoreResult<bool> {
        let activated = self.store.transition(&self.job_id, Transition::Activate).await?;
        if activated {
            self.report(checkpoints::STARTED).await;
        }
        Ok(activated)
    }

    /// Record a progress checkpoint.
    ///
    /// Progress is advisory: a failed write is logged and the job carries on.
    pub async fn report(&self, percent: u8) {
        match self
            .store
            .transition(&self.job_id, Transition::Progress(percent.min(100)))
            .await
        {
            Ok(true) => debug!(job_id = %self.job_id, progress = percent, "Progress updated"),
            Ok(false) => {}
            Err(e) => warn!(job_id = %self.job_id, "Failed to record progress {}: {}", percent, e),
        }
    }

    pub async fn complete(&self, result: Option<serde_json::Value>) -> StoreResult<bool> {
        self.store.transition(&self.job_id, Transition::Complete(result)).await
    }

    /// Back to waiting; a retry has been scheduled.
    pub async fn retry(&self, error: &str) -> StoreResult<bool> {
        self.store
            .transition(&self.job_id, Transition::Retry(error.to_string()))
            .await
    }

    pub async fn fail(&self, error: &str) -> StoreResult<bool> {
        self.store
            .transition(&self.job_id, Transition::Fail(error.to_string()))
            .await
    }

    /// Callback for synchronous progress sources such as the encoder.
    ///
    /// Values are mapped through `band` and written by a background task that
    /// ends once the callback is dropped. Only increases are forwarded.
    pub fn band_sink(&self, band: ProgressBand) -> (impl Fn(u8) + Send + Sync + 'static, JoinHandle<()>) {
        let (tx, mut rx) = watch::channel(0u8);
        let reporter = self.clone();

        let writer = tokio::spawn(async move {
            let mut last = None;
            while rx.changed().await.is_ok() {
                let local = *rx.borrow_and_update();
                let mapped = band.map(local);
                if last.map_or(true, |prev| mapped > prev) {
                    reporter.report(mapped).await;
                    last = Some(mapped);
                }
            }
        });

        let sink = move |local: u8| {
            tx.send_if_modified(|current| {
                if local > *current {
                    *current = local;
                    true
                } else {
                    false
                }
            });
        };
        (sink, writer)
    }
}
