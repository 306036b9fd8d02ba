//! Queue status handler.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use tracing::debug;

use reel_models::{JobType, StatusCounts};

use crate::error::ApiResult;
use crate::state::AppState;

/// Queue status response.
#[derive(Debug, Serialize)]
pub struct QueueStatusResponse {
    /// Whether the broker is reachable
    pub available: bool,
    /// Per job type counts from the record store
    pub counts: BTreeMap<JobType, StatusCounts>,
    /// Dead-lettered messages; absent while the broker is down
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead_lettered: Option<u64>,
}

/// GET /api/queue/status
///
/// Counts come from the record store, so they are served while the broker
/// is unavailable.
pub async fn get_queue_status(State(state): State<AppState>) -> ApiResult<Json<QueueStatusResponse>> {
    let mut counts = BTreeMap::new();
    for job_type in JobType::ALL {
        counts.insert(*job_type, state.jobs.counts(*job_type).await?);
    }

    let available = state.broker.is_available();
    let dead_lettered = if available {
        match state.broker.dead_lettered().await {
            Ok(n) => Some(n),
            Err(e) => {
                debug!("Dead-letter length unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    Ok(Json(QueueStatusResponse {
        available,
        counts,
        dead_lettered,
    }))
}
