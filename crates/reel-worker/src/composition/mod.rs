//! Video composition pipeline.
//!
//! Stages, in order:
//! 1. Resolve product, template and music; fail with `NoImages` before any
//!    file is created when the product has no candidate images
//! 2. Derive scenes (see [`scenes::derive_scenes`])
//! 3. Render one still frame per scene
//! 4. Encode frames and audio into one file
//! 5. Extract a thumbnail
//! 6. Persist video and thumbnail, record the output on the product
//!
//! All intermediate files live in a per-job directory that is removed
//! whether the run succeeds or fails.

pub mod audio;
pub mod images;
pub mod output;
pub mod scenes;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use tracing::{info, warn};

use reel_media::{
    encode_slideshow, generate_thumbnail, thumbnail_offset, FrameSpec, MediaFetcher, SlideshowSpec,
};
use reel_models::{CompositionOutput, CompositionRequest, MusicTrack, Product, Scene, VideoTemplate};
use reel_queue::metrics::names;
use reel_services::NarrationService;
use reel_storage::OutputStorage;
use reel_store::ProductStore;

use crate::config::CompositionConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::progress::{checkpoints, ProgressReporter};

pub use scenes::derive_scenes;

/// Everything resolved before the first file is written.
struct Inputs {
    product: Product,
    template: VideoTemplate,
    music: Option<MusicTrack>,
    scenes: Vec<Scene>,
}

/// Runs the composition pipeline for one request at a time.
#[derive(Clone)]
pub struct VideoComposer {
    products: Arc<dyn ProductStore>,
    storage: Arc<dyn OutputStorage>,
    narration: Option<Arc<dyn NarrationService>>,
    fetcher: MediaFetcher,
    config: CompositionConfig,
    work_dir: PathBuf,
}

impl VideoComposer {
    pub fn new(
        products: Arc<dyn ProductStore>,
        storage: Arc<dyn OutputStorage>,
        config: CompositionConfig,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            products,
            storage,
            narration: None,
            fetcher: MediaFetcher::new(config.fetch_timeout),
            config,
            work_dir: work_dir.into(),
        }
    }

    pub fn with_narration(mut self, narration: Option<Arc<dyn NarrationService>>) -> Self {
        self.narration = narration;
        self
    }

    /// Compose, persist and record the video for `request`.
    pub async fn compose(
        &self,
        request: &CompositionRequest,
        reporter: &ProgressReporter,
    ) -> WorkerResult<CompositionOutput> {
        let started = Instant::now();
        let inputs = self.resolve(request).await?;
        reporter.report(checkpoints::INPUTS_RESOLVED).await;

        info!(
            job_id = %reporter.job_id(),
            product_id = %inputs.product.id,
            template = %inputs.template.id,
            scenes = inputs.scenes.len(),
            music = inputs.music.is_some(),
            narration = request.narration().is_some(),
            "Composing video"
        );

        tokio::fs::create_dir_all(&self.work_dir).await?;
        let workspace = tempfile::Builder::new()
            .prefix(&format!("compose-{}-", reporter.job_id()))
            .tempdir_in(&self.work_dir)?;

        let result = self
            .render(request, &inputs, workspace.path(), reporter, started)
            .await;

        let workspace_path = workspace.path().to_path_buf();
        if let Err(e) = workspace.close() {
            warn!("Failed to remove work directory {}: {}", workspace_path.display(), e);
        }

        let output = result?;
        self.products.save_video(&inputs.product.id, &output).await?;
        histogram!(names::RENDER_SECONDS).record(output.render_secs);
        Ok(output)
    }

    /// Look up every input and derive scenes. Creates no files.
    async fn resolve(&self, request: &CompositionRequest) -> WorkerResult<Inputs> {
        let product = self
            .products
            .get_product(&request.product_id)
            .await?
            .ok_or_else(|| WorkerError::not_found(format!("product {}", request.product_id)))?;

        let template = self
            .products
            .get_template(&request.template_id)
            .await?
            .ok_or_else(|| WorkerError::not_found(format!("template {}", request.template_id)))?;
        template.validate().map_err(WorkerError::validation)?;

        let music = match &request.music_id {
            Some(id) => Some(
                self.products
                    .get_music(id)
                    .await?
                    .ok_or_else(|| WorkerError::not_found(format!("music track {}", id)))?,
            ),
            None => None,
        };

        if let Some(err) = audio::narration_unavailable(request.narration(), self.narration.as_ref()) {
            return Err(err);
        }

        let candidates = product.images.candidates();
        if candidates.is_empty() {
            return Err(WorkerError::NoImages(product.id.clone()));
        }

        let key_points = product
            .content
            .as_ref()
            .map(|c| c.key_points.clone())
            .unwrap_or_default();
        let scenes = derive_scenes(
            &candidates,
            &key_points,
            template.scene_duration_secs,
            self.config.min_duration_secs,
            template.transition,
        );

        Ok(Inputs {
            product,
            template,
            music,
            scenes,
        })
    }

    async fn render(
        &self,
        request: &CompositionRequest,
        inputs: &Inputs,
        dir: &Path,
        reporter: &ProgressReporter,
        started: Instant,
    ) -> WorkerResult<CompositionOutput> {
        let template = &inputs.template;
        let frame_spec = FrameSpec::new(template.width, template.height).with_preset(template.tonal_preset);
        let frames = images::render_scenes(&self.fetcher, &inputs.scenes, frame_spec, dir, reporter).await?;

        let audio = audio::prepare_audio(
            &self.fetcher,
            self.narration.as_ref(),
            request.narration(),
            inputs.music.as_ref(),
            self.config.music_volume,
            dir,
        )
        .await?;

        let spec = SlideshowSpec {
            frames,
            width: template.width,
            height: template.height,
            fps: template.fps,
            encoding: template.encoding.clone(),
            audio,
            duration_mode: self.config.audio_duration_mode,
        };

        let video_path = dir.join("output.mp4");
        let (on_progress, progress_writer) = reporter.band_sink(checkpoints::ENCODE);
        let encoded = encode_slideshow(&spec, &video_path, on_progress).await;
        // The sink has been dropped by now; wait for the last write.
        if let Err(e) = progress_writer.await {
            warn!("Progress writer ended abnormally: {}", e);
        }
        let encoded = encoded.map_err(WorkerError::Encoding)?;

        let thumbnail_path = dir.join("thumbnail.jpg");
        let offset = thumbnail_offset(self.config.thumbnail_offset_secs, encoded.duration_secs);
        generate_thumbnail(&encoded.path, &thumbnail_path, offset)
            .await
            .map_err(WorkerError::Encoding)?;
        reporter.report(checkpoints::THUMBNAIL).await;

        let output = output::persist_outputs(
            self.storage.as_ref(),
            &inputs.product.id,
            &template.id,
            &encoded.path,
            &thumbnail_path,
            encoded.duration_secs,
            started.elapsed().as_secs_f64(),
        )
        .await?;
        reporter.report(checkpoints::PERSISTED).await;
        Ok(output)
    }
}
