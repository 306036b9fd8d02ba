//! Clients for the external services the pipeline depends on.
//!
//! Each service sits behind a trait so the worker can be exercised with
//! in-process fakes:
//! - [`TextService`] turns product fields into captions and key points
//! - [`ImageSearchService`] and [`ImageGenerationService`] supply fallback images
//! - [`NarrationService`] synthesizes narration audio

pub mod config;
pub mod error;
pub mod http;
pub mod images;
pub mod narration;
pub mod text;

use std::sync::Arc;

pub use config::ServicesConfig;
pub use error::{ServiceError, ServiceResult};
pub use images::{HttpImageGeneration, HttpImageSearch, ImageGenerationService, ImageSearchService};
pub use narration::{HttpNarration, NarrationService};
pub use text::{ContentRequest, HttpTextService, TextService};

/// The set of service clients a worker uses. Unconfigured services are `None`.
#[derive(Clone, Default)]
pub struct Services {
    pub text: Option<Arc<dyn TextService>>,
    pub image_search: Option<Arc<dyn ImageSearchService>>,
    pub image_generation: Option<Arc<dyn ImageGenerationService>>,
    pub narration: Option<Arc<dyn NarrationService>>,
    pub search_limit: usize,
}

impl Services {
    /// Build HTTP clients for every configured URL.
    pub fn from_config(config: &ServicesConfig) -> ServiceResult<Self> {
        let mut services = Services {
            search_limit: config.search_limit,
            ..Default::default()
        };
        if let Some(url) = &config.text_url {
            services.text = Some(Arc::new(HttpTextService::new(url, config)?));
        }
        if let Some(url) = &config.image_search_url {
            services.image_search = Some(Arc::new(HttpImageSearch::new(url, config)?));
        }
        if let Some(url) = &config.image_generation_url {
            services.image_generation = Some(Arc::new(HttpImageGeneration::new(url, config)?));
        }
        if let Some(url) = &config.narration_url {
            services.narration = Some(Arc::new(HttpNarration::new(url, config)?));
        }
        Ok(services)
    }

    /// The text service, or `NotConfigured`.
    pub fn text(&self) -> ServiceResult<&Arc<dyn TextService>> {
        self.text
            .as_ref()
            .ok_or_else(|| ServiceError::NotConfigured("TEXT_SERVICE_URL".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_only_builds_configured() {
        let config = ServicesConfig {
            text_url: Some("http://localhost:9000".into()),
            ..Default::default()
        };
        let services = Services::from_config(&config).unwrap();
        assert!(services.text().is_ok());
        assert!(services.image_search.is_none());
        assert!(services.narration.is_none());
        assert!(Services::default().text().is_err());
    }
}
