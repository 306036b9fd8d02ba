//! Enqueue and job lookup handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::Validate;

use reel_models::{CompositionRequest, Job, JobId, JobStatus, JobType, MusicId, ProductId, TemplateId};
use reel_queue::{ContentGenerationJob, EnqueueError, JobPayload, MediaAcquisitionJob};
use reel_worker::runs_inline;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Body of `POST /api/products/:product_id/jobs`.
#[derive(Debug, Deserialize, Validate)]
pub struct EnqueueJobRequest {
    /// Job type; `content_generation`, `media_acquisition` or `video_composition`
    #[serde(rename = "type")]
    pub job_type: String,

    #[serde(default)]
    #[validate(range(max = 10))]
    pub priority: u8,

    #[validate(length(min = 1, max = 128))]
    pub template_id: Option<String>,

    #[validate(length(min = 1, max = 128))]
    pub music_id: Option<String>,

    #[validate(length(min = 1, max = 5000))]
    pub narration_text: Option<String>,

    #[validate(length(min = 1, max = 200))]
    pub query: Option<String>,

    pub generate_fallback: Option<bool>,
}

impl EnqueueJobRequest {
    /// Build the payload for `product_id`, checking type-specific fields.
    pub fn into_payload(self, product_id: ProductId) -> ApiResult<JobPayload> {
        let job_type: JobType = self
            .job_type
            .parse()
            .map_err(|e: reel_models::ParseJobTypeError| ApiError::bad_request(e.to_string()))?;

        let payload = match job_type {
            JobType::ContentGeneration => JobPayload::ContentGeneration(ContentGenerationJob { product_id }),
            JobType::MediaAcquisition => JobPayload::MediaAcquisition(MediaAcquisitionJob {
                product_id,
                query: self.query,
                generate_fallback: self.generate_fallback.unwrap_or(true),
            }),
            JobType::VideoComposition => {
                let template_id = self
                    .template_id
                    .ok_or_else(|| ApiError::Validation("template_id is required for video_composition".into()))?;
                let mut request = CompositionRequest::new(product_id, TemplateId::from_string(template_id));
                request.music_id = self.music_id.map(MusicId::from_string);
                request.narration_text = self.narration_text;
                JobPayload::VideoComposition(request)
            }
        };
        Ok(payload)
    }
}

/// Enqueue response.
#[derive(Debug, Serialize)]
pub struct EnqueueJobResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Ran synchronously because the queue was degraded
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub inline: bool,
}

/// POST /api/products/:product_id/jobs
///
/// Returns:
/// - 202: queued
/// - 200: queue degraded, job ran inline
/// - 400: invalid body
/// - 404: unknown product
/// - 409: an equivalent job is waiting or active
/// - 503: queue degraded and the job type cannot run inline
pub async fn enqueue_job(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
    Json(request): Json<EnqueueJobRequest>,
) -> ApiResult<(StatusCode, Json<EnqueueJobResponse>)> {
    request.validate()?;
    let priority = request.priority;
    let product_id = ProductId::from_string(product_id);

    if state.products.get_product(&product_id).await?.is_none() {
        return Err(ApiError::not_found(format!("product {}", product_id)));
    }

    let payload = request.into_payload(product_id)?;
    let job_type = payload.job_type();

    match state.producer.enqueue(payload.clone(), priority).await {
        Ok(job_id) => {
            info!(job_id = %job_id, job_type = %job_type, "Job accepted");
            Ok((
                StatusCode::ACCEPTED,
                Json(EnqueueJobResponse {
                    job_id,
                    status: JobStatus::Waiting,
                    inline: false,
                }),
            ))
        }
        Err(EnqueueError::Degraded) => {
            let executor = state
                .inline
                .as_ref()
                .filter(|_| runs_inline(job_type))
                .ok_or_else(|| ApiError::Degraded(format!("{} jobs need the queue", job_type)))?;

            warn!(job_type = %job_type, "Queue degraded, running job inline");
            let job = executor.execute(payload, priority).await?;
            Ok((
                StatusCode::OK,
                Json(EnqueueJobResponse {
                    job_id: job.id,
                    status: job.status,
                    inline: true,
                }),
            ))
        }
        Err(e) => Err(e.into()),
    }
}

/// GET /api/jobs/:job_id
pub async fn get_job(State(state): State<AppState>, Path(job_id): Path<String>) -> ApiResult<Json<Job>> {
    let id = JobId::from_string(job_id);
    state
        .jobs
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("job {}", id)))
}
