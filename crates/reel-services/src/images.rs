//! Image search and image generation services.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use reel_models::ImageRef;

use crate::config::ServicesConfig;
use crate::error::ServiceResult;
use crate::http::ServiceHttp;

/// Finds existing images for a text query.
#[async_trait]
pub trait ImageSearchService: Send + Sync {
    /// Zero or more results, best first.
    async fn search(&self, query: &str, limit: usize) -> ServiceResult<Vec<ImageRef>>;
}

/// Produces one image from a prompt.
#[async_trait]
pub trait ImageGenerationService: Send + Sync {
    async fn generate(&self, prompt: &str) -> ServiceResult<Option<ImageRef>>;
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    images: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    url: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    url: Option<String>,
}

/// HTTP image search client.
#[derive(Debug, Clone)]
pub struct HttpImageSearch {
    http: ServiceHttp,
}

impl HttpImageSearch {
    pub fn new(base_url: impl Into<String>, config: &ServicesConfig) -> ServiceResult<Self> {
        Ok(Self {
            http: ServiceHttp::new("image-search", base_url, config)?,
        })
    }
}

#[async_trait]
impl ImageSearchService for HttpImageSearch {
    async fn search(&self, query: &str, limit: usize) -> ServiceResult<Vec<ImageRef>> {
        let response: SearchResponse = self
            .http
            .post_json("search", &SearchRequest { query, limit })
            .await?;

        let images: Vec<ImageRef> = response
            .images
            .into_iter()
            .map(|hit| hit.url.trim().to_string())
            .filter(|url| !url.is_empty())
            .take(limit)
            .map(ImageRef::new)
            .collect();
        info!(query = query, found = images.len(), "Image search finished");
        Ok(images)
    }
}

/// HTTP image generation client.
#[derive(Debug, Clone)]
pub struct HttpImageGeneration {
    http: ServiceHttp,
}

impl HttpImageGeneration {
    pub fn new(base_url: impl Into<String>, config: &ServicesConfig) -> ServiceResult<Self> {
        Ok(Self {
            http: ServiceHttp::new("image-generation", base_url, config)?,
        })
    }
}

#[async_trait]
impl ImageGenerationService for HttpImageGeneration {
    async fn generate(&self, prompt: &str) -> ServiceResult<Option<ImageRef>> {
        let response: GenerateResponse = self
            .http
            .post_json("generate", &GenerateRequest { prompt })
            .await?;
        let image = response
            .url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .map(ImageRef::new);
        debug!(prompt = prompt, generated = image.is_some(), "Image generation finished");
        Ok(image)
    }
}
