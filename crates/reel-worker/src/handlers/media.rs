//! Media acquisition handler.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use reel_models::ImageSource;
use reel_queue::MediaAcquisitionJob;
use reel_services::{ServiceError, Services};
use reel_store::ProductStore;

use crate::error::{WorkerError, WorkerResult};
use crate::progress::ProgressReporter;

/// Find images for a product, generating one when search comes back empty.
///
/// Images are appended without duplicates, so a re-run adds nothing new.
pub async fn acquire_media(
    products: &Arc<dyn ProductStore>,
    services: &Services,
    job: &MediaAcquisitionJob,
    reporter: &ProgressReporter,
) -> WorkerResult<serde_json::Value> {
    let product = products
        .get_product(&job.product_id)
        .await?
        .ok_or_else(|| WorkerError::not_found(format!("product {}", job.product_id)))?;

    let query = job
        .query
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| product.image_query());
    if query.is_empty() {
        return Err(WorkerError::validation(format!("product {} has no name to search for", product.id)));
    }

    let search = services
        .image_search
        .as_ref()
        .ok_or_else(|| ServiceError::NotConfigured("IMAGE_SEARCH_URL".into()))?;
    let found = search.search(&query, services.search_limit).await?;
    reporter.report(50).await;

    let mut added = products.add_images(&product.id, ImageSource::Search, &found).await?;
    let mut generated = 0;

    if found.is_empty() && job.generate_fallback {
        match &services.image_generation {
            Some(generator) => {
                if let Some(image) = generator.generate(&query).await? {
                    generated = products
                        .add_images(&product.id, ImageSource::Generated, &[image])
                        .await?;
                    added += generated;
                }
            }
            None => warn!(product_id = %product.id, "Image search found nothing and generation is not configured"),
        }
    }
    reporter.report(90).await;

    info!(
        product_id = %product.id,
        query = %query,
        found = found.len(),
        generated = generated,
        added = added,
        "Media acquired"
    );

    Ok(json!({
        "images": added,
        "found": found.len(),
        "generated": generated,
    }))
}
