//! Job handlers, one per payload variant.

pub mod content;
pub mod media;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use reel_queue::{JobPayload, QueueMessage};
use reel_services::Services;
use reel_store::ProductStore;

use crate::composition::VideoComposer;
use crate::error::{WorkerError, WorkerResult};
use crate::progress::ProgressReporter;

pub use content::generate_content;
pub use media::acquire_media;

/// Executes the work carried by a message.
///
/// Handlers report progress and return a result or an error; they never
/// decide retry policy.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(
        &self,
        message: &QueueMessage,
        reporter: &ProgressReporter,
    ) -> WorkerResult<Option<serde_json::Value>>;
}

/// Encode a handler's output as the job result.
pub fn job_result<T: Serialize>(output: &T) -> WorkerResult<Option<serde_json::Value>> {
    Ok(Some(serde_json::to_value(output)?))
}

/// Production handler set.
#[derive(Clone)]
pub struct Handlers {
    products: Arc<dyn ProductStore>,
    services: Services,
    composer: VideoComposer,
}

impl Handlers {
    pub fn new(products: Arc<dyn ProductStore>, services: Services, composer: VideoComposer) -> Self {
        Self {
            products,
            services,
            composer,
        }
    }
}

#[async_trait]
impl JobHandler for Handlers {
    async fn execute(
        &self,
        message: &QueueMessage,
        reporter: &ProgressReporter,
    ) -> WorkerResult<Option<serde_json::Value>> {
        match &message.payload {
            JobPayload::ContentGeneration(job) => {
                generate_content(&self.products, &self.services, job, reporter)
                    .await
                    .map(Some)
            }
            JobPayload::MediaAcquisition(job) => {
                acquire_media(&self.products, &self.services, job, reporter)
                    .await
                    .map(Some)
            }
            JobPayload::VideoComposition(request) => {
                let output = self.composer.compose(request, reporter).await?;
                job_result(&output)
            }
        }
    }
}

/// Content generation only. Used for inline execution, where no
/// rendering stack is available.
#[derive(Clone)]
pub struct ContentHandler {
    products: Arc<dyn ProductStore>,
    services: Services,
}

impl ContentHandler {
    pub fn new(products: Arc<dyn ProductStore>, services: Services) -> Self {
        Self { products, services }
    }
}

#[async_trait]
impl JobHandler for ContentHandler {
    async fn execute(
        &self,
        message: &QueueMessage,
        reporter: &ProgressReporter,
    ) -> WorkerResult<Option<serde_json::Value>> {
        match &message.payload {
            JobPayload::ContentGeneration(job) => {
                generate_content(&self.products, &self.services, job, reporter)
                    .await
                    .map(Some)
            }
            other => Err(WorkerError::validation(format!(
                "{} jobs cannot run inline",
                other.job_type()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::error::ErrorClass;

    #[test]
    fn test_job_result_encodes_output() {
        let value = job_result(&serde_json::json!({"video": "videos/p1/t1.mp4"})).unwrap();
        assert_eq!(value.unwrap()["video"], "videos/p1/t1.mp4");
    }

    #[test]
    fn test_job_result_propagates_encoding_failure() {
        // JSON object keys must be strings.
        let output: HashMap<(u8, u8), u8> = HashMap::from([((1, 2), 3)]);
        let err = job_result(&output).unwrap_err();
        assert!(matches!(err, WorkerError::Serialization(_)));
        assert_eq!(err.class(), ErrorClass::Validation);
    }
}
