//! Resolve media references to bytes or local files.
//!
//! A reference is either an `http(s)://` URL, fetched with a bounded timeout,
//! or a local path (optionally `file://`-prefixed).

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// Default per-request timeout for remote media.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches images and audio referenced by products, templates and tracks.
#[derive(Debug, Clone)]
pub struct MediaFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl Default for MediaFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_FETCH_TIMEOUT)
    }
}

impl MediaFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Read the referenced bytes.
    pub async fn fetch_bytes(&self, location: &str) -> MediaResult<Vec<u8>> {
        match remote_url(location) {
            Some(url) => self.download(url).await,
            None => {
                let path = local_path(location);
                if !path.exists() {
                    return Err(MediaError::FileNotFound(path));
                }
                Ok(tokio::fs::read(&path).await?)
            }
        }
    }

    /// Make the reference available as a local file.
    ///
    /// Local references are returned as-is; remote ones are downloaded to `dest`.
    pub async fn fetch_to_file(&self, location: &str, dest: &Path) -> MediaResult<PathBuf> {
        match remote_url(location) {
            Some(url) => {
                let bytes = self.download(url).await?;
                tokio::fs::write(dest, &bytes).await?;
                Ok(dest.to_path_buf())
            }
            None => {
                let path = local_path(location);
                if !path.exists() {
                    return Err(MediaError::FileNotFound(path));
                }
                Ok(path)
            }
        }
    }

    async fn download(&self, url: &str) -> MediaResult<Vec<u8>> {
        debug!(url = url, timeout_secs = self.timeout.as_secs(), "Fetching remote media");

        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.map_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::fetch_failed(url, format!("HTTP {}", status)));
        }

        let bytes = response.bytes().await.map_err(|e| self.map_reqwest(url, e))?;
        if bytes.is_empty() {
            return Err(MediaError::fetch_failed(url, "empty response body"));
        }
        Ok(bytes.to_vec())
    }

    fn map_reqwest(&self, url: &str, e: reqwest::Error) -> MediaError {
        if e.is_timeout() {
            MediaError::FetchTimeout {
                location: url.to_string(),
                secs: self.timeout.as_secs(),
            }
        } else {
            MediaError::fetch_failed(url, e.to_string())
        }
    }
}

fn remote_url(location: &str) -> Option<&str> {
    let trimmed = location.trim();
    (trimmed.starts_with("http://") || trimmed.starts_with("https://")).then_some(trimmed)
}

fn local_path(location: &str) -> PathBuf {
    let trimmed = location.trim();
    PathBuf::from(trimmed.strip_prefix("file://").unwrap_or(trimmed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.png");
        std::fs::write(&file, b"png-bytes").unwrap();

        let fetcher = MediaFetcher::default();
        let bytes = fetcher.fetch_bytes(file.to_str().unwrap()).await.unwrap();
        assert_eq!(bytes, b"png-bytes");

        let prefixed = format!("file://{}", file.display());
        let resolved = fetcher
            .fetch_to_file(&prefixed, &dir.path().join("unused"))
            .await
            .unwrap();
        assert_eq!(resolved, file);
    }

    #[tokio::test]
    async fn test_missing_local_file() {
        let fetcher = MediaFetcher::default();
        assert!(matches!(
            fetcher.fetch_bytes("/nonexistent/image.jpg").await,
            Err(MediaError::FileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_remote() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("img.jpg");
        let fetcher = MediaFetcher::default();
        let out = fetcher
            .fetch_to_file(&format!("{}/img.jpg", server.uri()), &dest)
            .await
            .unwrap();
        assert_eq!(out, dest);
        assert_eq!(std::fs::read(dest).unwrap(), b"jpeg");
    }

    #[tokio::test]
    async fn test_remote_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = MediaFetcher::default()
            .fetch_bytes(&format!("{}/missing.jpg", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::FetchFailed { .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_remote_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"slow".to_vec())
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let fetcher = MediaFetcher::new(Duration::from_millis(200));
        let err = fetcher
            .fetch_bytes(&format!("{}/slow.jpg", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::FetchTimeout { .. }));
    }
}
