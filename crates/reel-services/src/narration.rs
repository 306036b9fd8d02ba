//! Narration (speech synthesis) service.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::config::ServicesConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::http::ServiceHttp;

/// Turns narration text into an audio file.
#[async_trait]
pub trait NarrationService: Send + Sync {
    /// Write synthesized audio to `dest` and return its path.
    async fn synthesize(&self, text: &str, dest: &Path) -> ServiceResult<PathBuf>;
}

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    format: &'a str,
}

/// HTTP narration client. The service answers with raw MP3 bytes.
#[derive(Debug, Clone)]
pub struct HttpNarration {
    http: ServiceHttp,
}

impl HttpNarration {
    pub fn new(base_url: impl Into<String>, config: &ServicesConfig) -> ServiceResult<Self> {
        Ok(Self {
            http: ServiceHttp::new("narration", base_url, config)?,
        })
    }
}

#[async_trait]
impl NarrationService for HttpNarration {
    async fn synthesize(&self, text: &str, dest: &Path) -> ServiceResult<PathBuf> {
        let audio = self
            .http
            .post_for_bytes("synthesize", &SynthesizeRequest { text, format: "mp3" })
            .await?;
        if audio.is_empty() {
            return Err(ServiceError::invalid_response("narration", "empty audio"));
        }
        tokio::fs::write(dest, &audio).await?;
        info!(bytes = audio.len(), "Narration synthesized to {}", dest.display());
        Ok(dest.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_synthesize_writes_audio() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/synthesize"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ID3audio".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("narration.mp3");
        let client = HttpNarration::new(server.uri(), &ServicesConfig::default()).unwrap();
        let out = client.synthesize("Meet the lamp.", &dest).await.unwrap();
        assert_eq!(std::fs::read(out).unwrap(), b"ID3audio");
    }

    #[tokio::test]
    async fn test_empty_audio_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = HttpNarration::new(server.uri(), &ServicesConfig::default()).unwrap();
        assert!(client
            .synthesize("x", &dir.path().join("n.mp3"))
            .await
            .is_err());
    }
}
