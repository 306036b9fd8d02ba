//! Shared HTTP plumbing for the service clients.

use std::time::Duration;

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::config::ServicesConfig;
use crate::error::{ServiceError, ServiceResult};

/// Longest response body kept in an error.
const MAX_ERROR_BODY: usize = 512;

/// HTTP client bound to one service base URL.
#[derive(Debug, Clone)]
pub struct ServiceHttp {
    service: &'static str,
    http: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl ServiceHttp {
    pub fn new(service: &'static str, base_url: impl Into<String>, config: &ServicesConfig) -> ServiceResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("reel-services/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ServiceError::from_reqwest(service, config.timeout.as_secs(), e))?;

        Ok(Self {
            service,
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            timeout: config.timeout,
        })
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> ServiceResult<Response> {
        let url = self.url(path);
        debug!(service = self.service, url = %url, "Calling service");

        let mut request = self.http.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.map_err(e))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            body.truncate(MAX_ERROR_BODY);
            return Err(ServiceError::Http {
                service: self.service,
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// POST JSON and decode a JSON response.
    pub async fn post_json<B, R>(&self, path: &str, body: &B) -> ServiceResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self.send(path, body).await?;
        let bytes = response.bytes().await.map_err(|e| self.map_err(e))?;
        serde_json::from_slice(&bytes).map_err(|e| ServiceError::invalid_response(self.service, e.to_string()))
    }

    /// POST JSON and return the raw response body.
    pub async fn post_for_bytes<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> ServiceResult<Vec<u8>> {
        let response = self.send(path, body).await?;
        let bytes = response.bytes().await.map_err(|e| self.map_err(e))?;
        Ok(bytes.to_vec())
    }

    fn map_err(&self, e: reqwest::Error) -> ServiceError {
        ServiceError::from_reqwest(self.service, self.timeout.as_secs(), e)
    }
}
