//! Local filesystem backend.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::StorageResult;
use crate::{validate_name, OutputStorage, StorageBackend, StoredObject};

/// Stores outputs under a root directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn target(&self, name: &str) -> StorageResult<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    async fn stored(&self, path: PathBuf) -> StorageResult<StoredObject> {
        let size = fs::metadata(&path).await?.len();
        Ok(StoredObject {
            location: path.to_string_lossy().to_string(),
            storage_id: None,
            size,
        })
    }
}

#[async_trait]
impl OutputStorage for LocalStorage {
    async fn store_file(&self, source: &Path, name: &str, _content_type: &str) -> StorageResult<StoredObject> {
        let target = self.target(name)?;
        move_file(source, &target).await?;
        info!("Stored {} at {}", name, target.display());
        self.stored(target).await
    }

    async fn store_bytes(&self, data: Vec<u8>, name: &str, _content_type: &str) -> StorageResult<StoredObject> {
        let target = self.target(name)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = target.with_extension("tmp");
        fs::write(&tmp, &data).await?;
        fs::rename(&tmp, &target).await?;
        self.stored(target).await
    }

    fn backend(&self) -> StorageBackend {
        StorageBackend::Local
    }
}

/// Move a file, falling back to copy + delete across filesystems.
pub async fn move_file(src: &Path, dst: &Path) -> StorageResult<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            debug!(
                "Cross-device rename, copying instead: {} -> {}",
                src.display(),
                dst.display()
            );
            copy_and_delete(src, dst).await
        }
        Err(e) => Err(e.into()),
    }
}

/// EXDEV is 18 on Linux and macOS.
fn is_cross_device_error(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(18)
}

async fn copy_and_delete(src: &Path, dst: &Path) -> StorageResult<()> {
    // Temp file next to dst keeps the final rename on one filesystem
    let tmp_dst = dst.with_extension("tmp");
    fs::copy(src, &tmp_dst).await?;

    if let Err(e) = fs::rename(&tmp_dst, dst).await {
        let _ = fs::remove_file(&tmp_dst).await;
        return Err(e.into());
    }

    if let Err(e) = fs::remove_file(src).await {
        warn!("Failed to remove {} after copy: {}", src.display(), e);
    }
    Ok(())
}
