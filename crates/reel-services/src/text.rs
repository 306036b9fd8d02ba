//! Text generation service.

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use reel_models::{GeneratedContent, Product};

use crate::config::ServicesConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::http::ServiceHttp;

/// Product fields sent to the text service.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContentRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
}

impl From<&Product> for ContentRequest {
    fn from(product: &Product) -> Self {
        Self {
            name: product.name.clone(),
            category: product.category.clone(),
            description: product.description.clone(),
            price: product.price.clone(),
        }
    }
}

/// Generates marketing text for a product.
#[async_trait]
pub trait TextService: Send + Sync {
    async fn generate(&self, request: &ContentRequest) -> ServiceResult<GeneratedContent>;
}

/// HTTP text service client.
#[derive(Debug, Clone)]
pub struct HttpTextService {
    http: ServiceHttp,
}

impl HttpTextService {
    pub fn new(base_url: impl Into<String>, config: &ServicesConfig) -> ServiceResult<Self> {
        Ok(Self {
            http: ServiceHttp::new("text", base_url, config)?,
        })
    }
}

/// Trim fields and drop blank key points; a caption is required.
fn normalize(mut content: GeneratedContent) -> ServiceResult<GeneratedContent> {
    content.caption = content.caption.trim().to_string();
    if content.caption.is_empty() {
        return Err(ServiceError::invalid_response("text", "empty caption"));
    }
    content.key_points = content
        .key_points
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    content.hashtags = content
        .hashtags
        .into_iter()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .collect();
    Ok(content)
}

#[async_trait]
impl TextService for HttpTextService {
    async fn generate(&self, request: &ContentRequest) -> ServiceResult<GeneratedContent> {
        let content: GeneratedContent = self.http.post_json("generate", request).await?;
        let content = normalize(content)?;
        info!(
            product = %request.name,
            key_points = content.key_points.len(),
            "Generated content"
        );
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::ProductId;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> ServicesConfig {
        ServicesConfig {
            api_key: Some("secret".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_generate_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(json!({"name": "Desk Lamp", "category": "Lighting"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "caption": " Light up your desk ",
                "hashtags": ["#lamp", " "],
                "description": "A lamp.",
                "keyPoints": ["Warm light", "", "USB-C"],
                "targetAudience": "Students"
            })))
            .mount(&server)
            .await;

        let client = HttpTextService::new(server.uri(), &config()).unwrap();
        let product = Product::new(ProductId::from_string("p1"), "Desk Lamp").with_category("Lighting");
        let content = client.generate(&ContentRequest::from(&product)).await.unwrap();

        assert_eq!(content.caption, "Light up your desk");
        assert_eq!(content.key_points, vec!["Warm light", "USB-C"]);
        assert_eq!(content.hashtags, vec!["#lamp"]);
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let client = HttpTextService::new(server.uri(), &config()).unwrap();
        let request = ContentRequest {
            name: "x".into(),
            category: None,
            description: None,
            price: None,
        };
        let err = client.generate(&request).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("502"));
    }

    #[tokio::test]
    async fn test_empty_caption_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"caption": ""})))
            .mount(&server)
            .await;

        let client = HttpTextService::new(server.uri(), &config()).unwrap();
        let request = ContentRequest {
            name: "x".into(),
            category: None,
            description: None,
            price: None,
        };
        let err = client.generate(&request).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidResponse { .. }));
        assert!(!err.is_retryable());
    }
}
