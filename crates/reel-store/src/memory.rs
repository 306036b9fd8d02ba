//! In-memory store for tests and single-process runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use reel_models::{
    CompositionOutput, GeneratedContent, ImageRef, ImageSource, Job, JobId, JobStatus, JobType,
    MusicId, MusicTrack, Product, ProductId, ProductStatus, StatusCounts, TemplateId,
    VideoTemplate,
};

use crate::error::{StoreError, StoreResult};
use crate::store::{InsertOutcome, JobStore, ProductStore, Transition};

#[derive(Default)]
struct State {
    jobs: HashMap<JobId, Job>,
    open: HashMap<(JobType, ProductId), JobId>,
    products: HashMap<ProductId, Product>,
    templates: HashMap<TemplateId, VideoTemplate>,
    music: HashMap<MusicId, MusicTrack>,
}

/// Both stores behind one lock, so a job transition and its product
/// mirror are applied together.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_template(&self, template: VideoTemplate) {
        self.state
            .lock()
            .await
            .templates
            .insert(template.id.clone(), template);
    }

    pub async fn put_music(&self, track: MusicTrack) {
        self.state.lock().await.music.insert(track.id.clone(), track);
    }

    /// All job records, for assertions.
    pub async fn jobs(&self) -> Vec<Job> {
        self.state.lock().await.jobs.values().cloned().collect()
    }
}

fn mirror(products: &mut HashMap<ProductId, Product>, job: &Job) {
    let Some(product) = products.get_mut(&job.subject_id) else {
        return;
    };
    product.status = ProductStatus::for_job(job.job_type, job.status);
    product.progress = job.progress;
    product.error = job.error.clone();
    product.updated_at = job.updated_at;
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn find_open(&self, subject: &ProductId, job_type: JobType) -> StoreResult<Option<Job>> {
        let state = self.state.lock().await;
        Ok(state
            .open
            .get(&(job_type, subject.clone()))
            .and_then(|id| state.jobs.get(id))
            .filter(|job| job.is_open())
            .cloned())
    }

    async fn insert(&self, job: &Job) -> StoreResult<InsertOutcome> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let key = (job.job_type, job.subject_id.clone());

        if let Some(existing) = state.open.get(&key) {
            if state.jobs.get(existing).is_some_and(Job::is_open) {
                return Ok(InsertOutcome::Duplicate(existing.clone()));
            }
        }

        state.open.insert(key, job.id.clone());
        state.jobs.insert(job.id.clone(), job.clone());
        mirror(&mut state.products, job);
        Ok(InsertOutcome::Created)
    }

    async fn get(&self, id: &JobId) -> StoreResult<Option<Job>> {
        Ok(self.state.lock().await.jobs.get(id).cloned())
    }

    async fn transition(&self, id: &JobId, transition: Transition) -> StoreResult<bool> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let job = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(format!("job {}", id)))?;

        let applied = match transition {
            Transition::Activate => job.start(),
            Transition::Progress(p) => job.set_progress(p),
            Transition::Complete(result) => job.complete(result),
            Transition::Retry(error) => job.requeue(error),
            Transition::Fail(error) => job.fail(error),
        };
        if !applied {
            return Ok(false);
        }

        if job.status.is_terminal() {
            let key = (job.job_type, job.subject_id.clone());
            if state.open.get(&key) == Some(&job.id) {
                state.open.remove(&key);
            }
        }
        let job = job.clone();
        mirror(&mut state.products, &job);
        Ok(true)
    }

    async fn counts(&self, job_type: JobType) -> StoreResult<StatusCounts> {
        let state = self.state.lock().await;
        let mut counts = StatusCounts::default();
        for job in state.jobs.values().filter(|j| j.job_type == job_type) {
            counts.record(job.status);
        }
        Ok(counts)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl ProductStore for MemoryStore {
    async fn get_product(&self, id: &ProductId) -> StoreResult<Option<Product>> {
        Ok(self.state.lock().await.products.get(id).cloned())
    }

    async fn put_product(&self, product: &Product) -> StoreResult<()> {
        self.state
            .lock()
            .await
            .products
            .insert(product.id.clone(), product.clone());
        Ok(())
    }

    async fn save_content(&self, id: &ProductId, content: &GeneratedContent) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let product = state
            .products
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(format!("product {}", id)))?;
        product.content = Some(content.clone());
        product.updated_at = Utc::now();
        Ok(())
    }

    async fn add_images(
        &self,
        id: &ProductId,
        source: ImageSource,
        refs: &[ImageRef],
    ) -> StoreResult<usize> {
        let mut state = self.state.lock().await;
        let product = state
            .products
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(format!("product {}", id)))?;
        let added = product.images.add(source, refs.iter().cloned());
        product.updated_at = Utc::now();
        Ok(added)
    }

    async fn save_video(&self, id: &ProductId, output: &CompositionOutput) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let product = state
            .products
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(format!("product {}", id)))?;
        product.video = Some(output.clone());
        product.updated_at = Utc::now();
        Ok(())
    }

    async fn get_template(&self, id: &TemplateId) -> StoreResult<Option<VideoTemplate>> {
        Ok(self.state.lock().await.templates.get(id).cloned())
    }

    async fn get_music(&self, id: &MusicId) -> StoreResult<Option<MusicTrack>> {
        Ok(self.state.lock().await.music.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product() -> Product {
        Product::new(ProductId::from_string("p1"), "Lamp")
    }

    fn job(job_type: JobType) -> Job {
        Job::new(job_type, ProductId::from_string("p1"), 5)
    }

    #[tokio::test]
    async fn test_single_open_job_per_subject_and_type() {
        let store = MemoryStore::new();
        let first = job(JobType::VideoComposition);
        assert_eq!(store.insert(&first).await.unwrap(), InsertOutcome::Created);

        let second = job(JobType::VideoComposition);
        assert_eq!(
            store.insert(&second).await.unwrap(),
            InsertOutcome::Duplicate(first.id.clone())
        );

        // A different type for the same subject is independent.
        let other = job(JobType::ContentGeneration);
        assert_eq!(store.insert(&other).await.unwrap(), InsertOutcome::Created);

        // Once terminal, a new job may be opened.
        store.transition(&first.id, Transition::Activate).await.unwrap();
        store
            .transition(&first.id, Transition::Fail("boom".into()))
            .await
            .unwrap();
        assert!(store
            .find_open(&first.subject_id, JobType::VideoComposition)
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.insert(&second).await.unwrap(), InsertOutcome::Created);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_only_while_active() {
        let store = MemoryStore::new();
        let j = job(JobType::VideoComposition);
        store.insert(&j).await.unwrap();

        assert!(!store.transition(&j.id, Transition::Progress(10)).await.unwrap());
        store.transition(&j.id, Transition::Activate).await.unwrap();
        assert!(store.transition(&j.id, Transition::Progress(50)).await.unwrap());
        assert!(!store.transition(&j.id, Transition::Progress(40)).await.unwrap());

        let stored = store.get(&j.id).await.unwrap().unwrap();
        assert_eq!(stored.progress, 50);
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn test_product_mirrors_every_transition() {
        let store = MemoryStore::new();
        store.put_product(&product()).await.unwrap();
        let j = job(JobType::VideoComposition);
        store.insert(&j).await.unwrap();

        let p = store.get_product(&j.subject_id).await.unwrap().unwrap();
        assert_eq!(p.status, ProductStatus::Queued);

        store.transition(&j.id, Transition::Activate).await.unwrap();
        store.transition(&j.id, Transition::Progress(60)).await.unwrap();
        let p = store.get_product(&j.subject_id).await.unwrap().unwrap();
        assert_eq!(p.status, ProductStatus::Rendering);
        assert_eq!(p.progress, 60);

        store
            .transition(&j.id, Transition::Retry("ffmpeg crashed".into()))
            .await
            .unwrap();
        let p = store.get_product(&j.subject_id).await.unwrap().unwrap();
        assert_eq!(p.status, ProductStatus::Queued);
        assert_eq!(p.error.as_deref(), Some("ffmpeg crashed"));

        store.transition(&j.id, Transition::Activate).await.unwrap();
        store.transition(&j.id, Transition::Complete(None)).await.unwrap();
        let p = store.get_product(&j.subject_id).await.unwrap().unwrap();
        let stored = store.get(&j.id).await.unwrap().unwrap();
        assert_eq!(p.status, ProductStatus::Ready);
        assert_eq!(stored.status, JobStatus::Completed);
        assert!(p.error.is_none());

        // Terminal jobs ignore further transitions.
        assert!(!store
            .transition(&j.id, Transition::Fail("late".into()))
            .await
            .unwrap());
        let p = store.get_product(&j.subject_id).await.unwrap().unwrap();
        assert_eq!(p.status, ProductStatus::Ready);
    }

    #[tokio::test]
    async fn test_counts_and_missing_job() {
        let store = MemoryStore::new();
        let a = job(JobType::MediaAcquisition);
        store.insert(&a).await.unwrap();
        store.transition(&a.id, Transition::Activate).await.unwrap();

        let counts = store.counts(JobType::MediaAcquisition).await.unwrap();
        assert_eq!(counts.active, 1);
        assert_eq!(counts.total, 1);
        assert_eq!(store.counts(JobType::VideoComposition).await.unwrap().total, 0);

        let err = store
            .transition(&JobId::from_string("nope"), Transition::Activate)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_product_updates_require_product() {
        let store = MemoryStore::new();
        let id = ProductId::from_string("missing");
        assert!(store
            .save_content(&id, &GeneratedContent::default())
            .await
            .is_err());

        store.put_product(&product()).await.unwrap();
        let added = store
            .add_images(
                &ProductId::from_string("p1"),
                ImageSource::Search,
                &[ImageRef::new("a.jpg"), ImageRef::new("b.jpg")],
            )
            .await
            .unwrap();
        assert_eq!(added, 2);
    }
}
