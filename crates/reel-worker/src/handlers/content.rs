//! Content generation handler.

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use reel_queue::ContentGenerationJob;
use reel_services::{ContentRequest, Services};
use reel_store::ProductStore;

use crate::error::{WorkerError, WorkerResult};
use crate::progress::ProgressReporter;

/// Generate marketing text for a product and store it.
///
/// Re-running overwrites the previous content, so retries are harmless.
pub async fn generate_content(
    products: &Arc<dyn ProductStore>,
    services: &Services,
    job: &ContentGenerationJob,
    reporter: &ProgressReporter,
) -> WorkerResult<serde_json::Value> {
    let product = products
        .get_product(&job.product_id)
        .await?
        .ok_or_else(|| WorkerError::not_found(format!("product {}", job.product_id)))?;
    let text = services.text()?;
    reporter.report(20).await;

    let content = text.generate(&ContentRequest::from(&product)).await?;
    reporter.report(80).await;

    products.save_content(&product.id, &content).await?;
    info!(
        product_id = %product.id,
        key_points = content.key_points.len(),
        hashtags = content.hashtags.len(),
        "Content generated"
    );

    Ok(json!({
        "key_points": content.key_points.len(),
        "hashtags": content.hashtags.len(),
    }))
}
