//! Per-scene frame rendering.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use reel_media::{render_frame, FrameSpec, MediaFetcher, SlideFrame};
use reel_models::{ImageRef, Scene};

use crate::error::{WorkerError, WorkerResult};
use crate::progress::{checkpoints, ProgressReporter};

/// Fetch, decode and shape one still frame per scene, in order.
///
/// A reused image is rendered once. The first failing scene aborts the
/// whole run with its index.
pub async fn render_scenes(
    fetcher: &MediaFetcher,
    scenes: &[Scene],
    spec: FrameSpec,
    dir: &Path,
    reporter: &ProgressReporter,
) -> WorkerResult<Vec<SlideFrame>> {
    let mut rendered: HashMap<&ImageRef, PathBuf> = HashMap::new();
    let mut frames = Vec::with_capacity(scenes.len());

    for (index, scene) in scenes.iter().enumerate() {
        let path = match rendered.get(&scene.image) {
            Some(path) => path.clone(),
            None => {
                let location = scene.image.as_str();
                let bytes = fetcher
                    .fetch_bytes(location)
                    .await
                    .map_err(|e| WorkerError::scene(index, e))?;
                let output = dir.join(format!("frame_{index:03}.png"));
                let path = render_frame(bytes, location.to_string(), spec, output)
                    .await
                    .map_err(|e| WorkerError::scene(index, e))?;
                debug!(scene = index, image = location, "Rendered frame");
                rendered.insert(&scene.image, path.clone());
                path
            }
        };

        let caption = if scene.text.is_empty() {
            None
        } else {
            let file = dir.join(format!("caption_{index:03}.txt"));
            tokio::fs::write(&file, scene.text.as_bytes()).await?;
            Some(file)
        };

        frames.push(SlideFrame {
            path,
            duration_secs: scene.duration_secs,
            transition: scene.transition,
            caption,
        });
        reporter
            .report(checkpoints::FRAMES.step(index + 1, scenes.len()))
            .await;
    }

    Ok(frames)
}
