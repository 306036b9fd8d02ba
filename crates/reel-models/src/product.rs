//! Products: the subject entity every job acts upon.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::composition::CompositionOutput;
use crate::job::{JobStatus, JobType};

/// Unique identifier for a product.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ProductId(pub String);

impl ProductId {
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Product-level status, mirrored from the job currently acting on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    #[default]
    Draft,
    /// A job is waiting in a queue (first delivery or retry)
    Queued,
    Generating,
    ContentReady,
    AcquiringMedia,
    MediaReady,
    Rendering,
    /// Video rendered and persisted
    Ready,
    Failed,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Draft => "draft",
            ProductStatus::Queued => "queued",
            ProductStatus::Generating => "generating",
            ProductStatus::ContentReady => "content_ready",
            ProductStatus::AcquiringMedia => "acquiring_media",
            ProductStatus::MediaReady => "media_ready",
            ProductStatus::Rendering => "rendering",
            ProductStatus::Ready => "ready",
            ProductStatus::Failed => "failed",
        }
    }

    /// Status a product takes when a job of `job_type` enters `status`.
    pub fn for_job(job_type: JobType, status: JobStatus) -> Self {
        match (job_type, status) {
            (_, JobStatus::Waiting) => ProductStatus::Queued,
            (_, JobStatus::Failed) => ProductStatus::Failed,
            (JobType::ContentGeneration, JobStatus::Active) => ProductStatus::Generating,
            (JobType::ContentGeneration, JobStatus::Completed) => ProductStatus::ContentReady,
            (JobType::MediaAcquisition, JobStatus::Active) => ProductStatus::AcquiringMedia,
            (JobType::MediaAcquisition, JobStatus::Completed) => ProductStatus::MediaReady,
            (JobType::VideoComposition, JobStatus::Active) => ProductStatus::Rendering,
            (JobType::VideoComposition, JobStatus::Completed) => ProductStatus::Ready,
        }
    }
}

impl fmt::Display for ProductStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProductStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "draft" => ProductStatus::Draft,
            "queued" => ProductStatus::Queued,
            "generating" => ProductStatus::Generating,
            "content_ready" => ProductStatus::ContentReady,
            "acquiring_media" => ProductStatus::AcquiringMedia,
            "media_ready" => ProductStatus::MediaReady,
            "rendering" => ProductStatus::Rendering,
            "ready" => ProductStatus::Ready,
            "failed" => ProductStatus::Failed,
            other => return Err(format!("unknown product status: {}", other)),
        })
    }
}

/// Marketing text produced by the text service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedContent {
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub description: String,
    /// One overlay line per scene, in order
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub target_audience: String,
}

/// Location of an image: a local path or an http(s) URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ImageRef(pub String);

impl ImageRef {
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the image must be fetched over the network.
    pub fn is_remote(&self) -> bool {
        url::Url::parse(&self.0)
            .map(|u| matches!(u.scheme(), "http" | "https"))
            .unwrap_or(false)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a product image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    Scraped,
    Search,
    Generated,
    Uploaded,
}

/// Product images grouped by source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProductImages {
    #[serde(default)]
    pub scraped: Vec<ImageRef>,
    #[serde(default)]
    pub search: Vec<ImageRef>,
    #[serde(default)]
    pub generated: Vec<ImageRef>,
    #[serde(default)]
    pub uploaded: Vec<ImageRef>,
}

impl ProductImages {
    pub fn source_mut(&mut self, source: ImageSource) -> &mut Vec<ImageRef> {
        match source {
            ImageSource::Scraped => &mut self.scraped,
            ImageSource::Search => &mut self.search,
            ImageSource::Generated => &mut self.generated,
            ImageSource::Uploaded => &mut self.uploaded,
        }
    }

    /// Append refs to a source, skipping ones already present there.
    pub fn add(&mut self, source: ImageSource, refs: impl IntoIterator<Item = ImageRef>) -> usize {
        let list = self.source_mut(source);
        let mut added = 0;
        for r in refs {
            if !list.contains(&r) {
                list.push(r);
                added += 1;
            }
        }
        added
    }

    /// Candidate images for composition: scraped first, then search,
    /// generated and uploaded fallbacks.
    pub fn candidates(&self) -> Vec<ImageRef> {
        self.scraped
            .iter()
            .chain(&self.search)
            .chain(&self.generated)
            .chain(&self.uploaded)
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.scraped.is_empty()
            && self.search.is_empty()
            && self.generated.is_empty()
            && self.uploaded.is_empty()
    }
}

/// A product record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub status: ProductStatus,
    /// Last job error mirrored onto the product
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Progress of the job currently acting on the product
    #[serde(default)]
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<GeneratedContent>,
    #[serde(default)]
    pub images: ProductImages,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<CompositionOutput>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn new(id: ProductId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            category: None,
            description: None,
            price: None,
            status: ProductStatus::Draft,
            error: None,
            progress: 0,
            content: None,
            images: ProductImages::default(),
            video: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Text query used for image search.
    pub fn image_query(&self) -> String {
        match self.category.as_deref().map(str::trim) {
            Some(category) if !category.is_empty() => format!("{} {}", self.name.trim(), category),
            _ => self.name.trim().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidates_priority_order() {
        let mut images = ProductImages::default();
        images.add(ImageSource::Uploaded, [ImageRef::new("u.jpg")]);
        images.add(ImageSource::Generated, [ImageRef::new("g.jpg")]);
        images.add(ImageSource::Scraped, [ImageRef::new("s.jpg")]);
        images.add(ImageSource::Search, [ImageRef::new("q.jpg")]);

        let order: Vec<_> = images.candidates().into_iter().map(|r| r.0).collect();
        assert_eq!(order, vec!["s.jpg", "q.jpg", "g.jpg", "u.jpg"]);
    }

    #[test]
    fn test_add_skips_duplicates() {
        let mut images = ProductImages::default();
        assert_eq!(images.add(ImageSource::Search, [ImageRef::new("a"), ImageRef::new("a")]), 1);
        assert_eq!(images.add(ImageSource::Search, [ImageRef::new("a")]), 0);
    }

    #[test]
    fn test_status_mirror_mapping() {
        use JobStatus::*;
        assert_eq!(ProductStatus::for_job(JobType::VideoComposition, Completed), ProductStatus::Ready);
        assert_eq!(ProductStatus::for_job(JobType::VideoComposition, Active), ProductStatus::Rendering);
        assert_eq!(ProductStatus::for_job(JobType::ContentGeneration, Failed), ProductStatus::Failed);
        assert_eq!(ProductStatus::for_job(JobType::MediaAcquisition, Waiting), ProductStatus::Queued);
    }

    #[test]
    fn test_image_query() {
        let product = Product::new(ProductId::from_string("p"), " Desk Lamp ").with_category("lighting");
        assert_eq!(product.image_query(), "Desk Lamp lighting");
        assert!(ImageRef::new("https://cdn/x.png").is_remote());
        assert!(!ImageRef::new("/tmp/x.png").is_remote());
    }
}
