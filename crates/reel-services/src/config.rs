//! External service endpoints.

use std::time::Duration;

/// Configuration for the external service clients.
#[derive(Debug, Clone)]
pub struct ServicesConfig {
    /// Text generation service base URL
    pub text_url: Option<String>,
    /// Image search service base URL
    pub image_search_url: Option<String>,
    /// Image generation service base URL
    pub image_generation_url: Option<String>,
    /// Narration (speech synthesis) service base URL
    pub narration_url: Option<String>,
    /// Bearer token sent to every service
    pub api_key: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Maximum images requested from search
    pub search_limit: usize,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            text_url: None,
            image_search_url: None,
            image_generation_url: None,
            narration_url: None,
            api_key: None,
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(5),
            search_limit: 8,
        }
    }
}

fn env_url(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
}

impl ServicesConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            text_url: env_url("TEXT_SERVICE_URL"),
            image_search_url: env_url("IMAGE_SEARCH_URL"),
            image_generation_url: env_url("IMAGE_GENERATION_URL"),
            narration_url: env_url("NARRATION_SERVICE_URL"),
            api_key: std::env::var("SERVICES_API_KEY").ok().filter(|s| !s.is_empty()),
            timeout: std::env::var("SERVICES_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            connect_timeout: std::env::var("SERVICES_CONNECT_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            search_limit: std::env::var("IMAGE_SEARCH_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.search_limit),
        }
    }
}
