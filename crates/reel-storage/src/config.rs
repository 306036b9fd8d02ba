//! Storage backend selection.

use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{StorageError, StorageResult};
use crate::r2::R2Config;

/// Where finished outputs go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageBackend {
    #[default]
    Local,
    R2,
}

impl FromStr for StorageBackend {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "fs" => Ok(StorageBackend::Local),
            "r2" | "s3" => Ok(StorageBackend::R2),
            other => Err(StorageError::config_error(format!(
                "unknown STORAGE_BACKEND: {}",
                other
            ))),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory for the local backend
    pub output_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            output_dir: PathBuf::from("./output"),
        }
    }
}

impl StorageConfig {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        let backend = match std::env::var("STORAGE_BACKEND") {
            Ok(v) => v.parse()?,
            Err(_) => StorageBackend::default(),
        };
        Ok(Self {
            backend,
            output_dir: std::env::var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./output")),
        })
    }

    /// R2 settings, read only when that backend is selected.
    pub fn r2(&self) -> StorageResult<Option<R2Config>> {
        match self.backend {
            StorageBackend::Local => Ok(None),
            StorageBackend::R2 => R2Config::from_env().map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parse() {
        assert_eq!("local".parse::<StorageBackend>().unwrap(), StorageBackend::Local);
        assert_eq!(" R2 ".parse::<StorageBackend>().unwrap(), StorageBackend::R2);
        assert!("gcs".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn test_local_has_no_r2_config() {
        assert!(StorageConfig::default().r2().unwrap().is_none());
    }
}
