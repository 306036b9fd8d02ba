//! Output persistence.

use std::path::Path;

use tracing::info;

use reel_models::{CompositionOutput, ProductId, TemplateId};
use reel_storage::OutputStorage;

use crate::error::WorkerResult;

/// Storage names for one product and template.
///
/// Names are stable across attempts, so a re-executed job overwrites its
/// own earlier output instead of leaving a second copy.
pub fn output_names(product: &ProductId, template: &TemplateId) -> (String, String) {
    let base = format!("videos/{}/{}", sanitize(product.as_str()), sanitize(template.as_str()));
    (format!("{base}.mp4"), format!("{base}.jpg"))
}

/// Percent-encode an id into a single path segment. Distinct ids give
/// distinct segments, and dots are escaped so no segment reads as `.` or `..`.
fn sanitize(segment: &str) -> String {
    if segment.is_empty() {
        // A bare `%` is never produced by the encoder.
        return "%".to_string();
    }
    urlencoding::encode(segment).replace('.', "%2E")
}

/// Store the encoded video and its thumbnail.
pub async fn persist_outputs(
    storage: &dyn OutputStorage,
    product: &ProductId,
    template: &TemplateId,
    video: &Path,
    thumbnail: &Path,
    duration_secs: f64,
    render_secs: f64,
) -> WorkerResult<CompositionOutput> {
    let (video_name, thumbnail_name) = output_names(product, template);

    // Thumbnail first: a failed upload must not leave a video without one.
    let stored_thumbnail = storage
        .store_file(thumbnail, &thumbnail_name, "image/jpeg")
        .await?;
    let stored_video = storage.store_file(video, &video_name, "video/mp4").await?;

    info!(
        product_id = %product,
        backend = ?storage.backend(),
        size = stored_video.size,
        "Stored video at {}", stored_video.location
    );

    Ok(CompositionOutput {
        file_location: stored_video.location,
        file_size: stored_video.size,
        thumbnail_location: stored_thumbnail.location,
        duration_secs,
        render_secs,
        storage_id: stored_video.storage_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use reel_storage::{LocalStorage, StorageBackend, StorageError, StorageResult, StoredObject};

    #[test]
    fn test_output_names_are_safe() {
        let (video, thumb) = output_names(&ProductId::from_string("p/../1"), &TemplateId::from_string("promo"));
        assert_eq!(video, "videos/p%2F%2E%2E%2F1/promo.mp4");
        assert_eq!(thumb, "videos/p%2F%2E%2E%2F1/promo.jpg");

        let (plain, _) = output_names(&ProductId::from_string("p1"), &TemplateId::from_string("t-1_a"));
        assert_eq!(plain, "videos/p1/t-1_a.mp4");
    }

    #[test]
    fn test_output_names_do_not_collide() {
        let template = TemplateId::from_string("t1");
        let ids = ["a/b", "a_b", "a%2Fb", "a.b", "", "%"];
        let names: std::collections::HashSet<String> = ids
            .iter()
            .map(|id| output_names(&ProductId::from_string(*id), &template).0)
            .collect();
        assert_eq!(names.len(), ids.len());
    }

    /// Records stored names and refuses one of them.
    struct Refusing {
        refuse: &'static str,
        stored: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl OutputStorage for Refusing {
        async fn store_file(&self, _source: &Path, name: &str, _content_type: &str) -> StorageResult<StoredObject> {
            if name.ends_with(self.refuse) {
                return Err(StorageError::config_error("upload refused"));
            }
            self.stored.lock().unwrap().push(name.to_string());
            Ok(StoredObject {
                location: name.to_string(),
                storage_id: None,
                size: 1,
            })
        }

        async fn store_bytes(&self, _data: Vec<u8>, name: &str, content_type: &str) -> StorageResult<StoredObject> {
            self.store_file(Path::new(name), name, content_type).await
        }

        fn backend(&self) -> StorageBackend {
            StorageBackend::R2
        }
    }

    #[tokio::test]
    async fn test_failed_thumbnail_leaves_no_video() {
        let storage = Refusing {
            refuse: ".jpg",
            stored: Mutex::new(Vec::new()),
        };
        let result = persist_outputs(
            &storage,
            &ProductId::from_string("p1"),
            &TemplateId::from_string("t1"),
            Path::new("output.mp4"),
            Path::new("thumb.jpg"),
            12.0,
            3.5,
        )
        .await;

        assert!(result.is_err());
        assert!(storage.stored.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persist_moves_files_into_storage() {
        let work = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let video = work.path().join("output.mp4");
        let thumb = work.path().join("thumb.jpg");
        std::fs::write(&video, vec![0u8; 2048]).unwrap();
        std::fs::write(&thumb, b"jpg").unwrap();

        let storage = LocalStorage::new(out.path());
        let output = persist_outputs(
            &storage,
            &ProductId::from_string("p1"),
            &TemplateId::from_string("t1"),
            &video,
            &thumb,
            12.0,
            3.5,
        )
        .await
        .unwrap();

        assert_eq!(output.file_size, 2048);
        assert!(out.path().join("videos/p1/t1.mp4").exists());
        assert!(out.path().join("videos/p1/t1.jpg").exists());
        assert!(!video.exists());
        assert!((output.duration_secs - 12.0).abs() < 1e-9);
    }
}
