//! Cloudflare R2 backend.

use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::{validate_name, OutputStorage, StorageBackend, StoredObject};

/// Configuration for R2 client.
#[derive(Debug, Clone)]
pub struct R2Config {
    /// R2 endpoint URL (S3 API endpoint)
    pub endpoint_url: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    /// Region (usually "auto" for R2)
    pub region: String,
    /// Public base URL serving the bucket, if any
    pub public_url: Option<String>,
}

impl R2Config {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            endpoint_url: std::env::var("R2_ENDPOINT_URL")
                .map_err(|_| StorageError::config_error("R2_ENDPOINT_URL not set"))?,
            access_key_id: std::env::var("R2_ACCESS_KEY_ID")
                .map_err(|_| StorageError::config_error("R2_ACCESS_KEY_ID not set"))?,
            secret_access_key: std::env::var("R2_SECRET_ACCESS_KEY")
                .map_err(|_| StorageError::config_error("R2_SECRET_ACCESS_KEY not set"))?,
            bucket_name: std::env::var("R2_BUCKET_NAME")
                .map_err(|_| StorageError::config_error("R2_BUCKET_NAME not set"))?,
            region: std::env::var("R2_REGION").unwrap_or_else(|_| "auto".to_string()),
            public_url: std::env::var("R2_PUBLIC_URL").ok().filter(|s| !s.is_empty()),
        })
    }

    /// Readable location for a key.
    pub fn location(&self, key: &str) -> String {
        match &self.public_url {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), key),
            None => format!("r2://{}/{}", self.bucket_name, key),
        }
    }
}

/// R2 storage client.
#[derive(Clone)]
pub struct R2Storage {
    client: Client,
    config: R2Config,
}

impl R2Storage {
    pub async fn new(config: R2Config) -> StorageResult<Self> {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "r2",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(sdk_config),
            config,
        })
    }

    async fn put(&self, body: ByteStream, key: &str, content_type: &str) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(&self.config.bucket_name)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;
        Ok(())
    }

    /// Check connectivity by performing a head bucket operation.
    pub async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.config.bucket_name)
            .send()
            .await
            .map_err(|e| StorageError::AwsSdk(format!("R2 connectivity check failed: {}", e)))?;
        Ok(())
    }

    fn stored(&self, key: &str, size: u64) -> StoredObject {
        StoredObject {
            location: self.config.location(key),
            storage_id: Some(key.to_string()),
            size,
        }
    }
}

#[async_trait]
impl OutputStorage for R2Storage {
    async fn store_file(&self, source: &Path, name: &str, content_type: &str) -> StorageResult<StoredObject> {
        validate_name(name)?;
        let size = tokio::fs::metadata(source).await?.len();
        debug!("Uploading {} to {}", source.display(), name);

        let body = ByteStream::from_path(source)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;
        self.put(body, name, content_type).await?;

        info!("Uploaded {} to {}", source.display(), name);
        Ok(self.stored(name, size))
    }

    async fn store_bytes(&self, data: Vec<u8>, name: &str, content_type: &str) -> StorageResult<StoredObject> {
        validate_name(name)?;
        let size = data.len() as u64;
        debug!("Uploading {} bytes to {}", size, name);
        self.put(ByteStream::from(data), name, content_type).await?;
        Ok(self.stored(name, size))
    }

    fn backend(&self) -> StorageBackend {
        StorageBackend::R2
    }
}
