//! Output persistence for finished videos and thumbnails.
//!
//! Two backends share the [`OutputStorage`] trait:
//! - [`LocalStorage`] moves files under an output directory
//! - [`R2Storage`] uploads to a Cloudflare R2 (S3 compatible) bucket

pub mod config;
pub mod error;
pub mod local;
pub mod r2;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

pub use config::{StorageBackend, StorageConfig};
pub use error::{StorageError, StorageResult};
pub use local::LocalStorage;
pub use r2::{R2Config, R2Storage};

/// A stored object.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    /// Path or URL where the object can be read
    pub location: String,
    /// Backend key, when the backend has one
    pub storage_id: Option<String>,
    pub size: u64,
}

/// Durable storage for composition outputs.
#[async_trait]
pub trait OutputStorage: Send + Sync {
    /// Persist a local file under `name`. The source may be consumed.
    async fn store_file(&self, source: &Path, name: &str, content_type: &str) -> StorageResult<StoredObject>;

    /// Persist raw bytes under `name`.
    async fn store_bytes(&self, data: Vec<u8>, name: &str, content_type: &str) -> StorageResult<StoredObject>;

    fn backend(&self) -> StorageBackend;
}

/// Build the configured backend.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn OutputStorage>> {
    match config.r2()? {
        Some(r2) => Ok(Arc::new(R2Storage::new(r2).await?)),
        None => Ok(Arc::new(LocalStorage::new(&config.output_dir))),
    }
}

/// Reject names that could escape the storage root.
pub(crate) fn validate_name(name: &str) -> StorageResult<()> {
    let bad = name.is_empty()
        || name.starts_with('/')
        || name.contains('\\')
        || name.split('/').any(|part| part.is_empty() || part == "." || part == "..");
    if bad {
        Err(StorageError::InvalidKey(name.to_string()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("videos/p1/video.mp4").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("/etc/passwd").is_err());
        assert!(validate_name("videos/../secret").is_err());
        assert!(validate_name("videos//x").is_err());
    }

    #[tokio::test]
    async fn test_from_config_builds_local_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            backend: StorageBackend::Local,
            output_dir: dir.path().to_path_buf(),
        };
        let storage = from_config(&config).await.unwrap();
        assert_eq!(storage.backend(), StorageBackend::Local);

        let stored = storage
            .store_bytes(b"ok".to_vec(), "videos/p1/t1.jpg", "image/jpeg")
            .await
            .unwrap();
        assert_eq!(stored.size, 2);
        assert!(dir.path().join("videos/p1/t1.jpg").exists());
    }
}
