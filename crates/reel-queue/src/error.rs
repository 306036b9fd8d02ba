//! Queue error types.

use thiserror::Error;

use reel_models::JobId;
use reel_store::StoreError;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Broker unavailable")]
    Unavailable,

    #[error("Malformed message {id}: {reason}")]
    Malformed { id: String, reason: String },

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn malformed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// True when the failure means the broker connection is gone.
    pub fn is_connection_error(&self) -> bool {
        match self {
            QueueError::ConnectionFailed(_) | QueueError::Unavailable => true,
            QueueError::Redis(e) => is_connection_error(e),
            _ => false,
        }
    }
}

pub(crate) fn is_connection_error(e: &redis::RedisError) -> bool {
    e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
}

/// Why an enqueue request was not accepted.
#[derive(Debug, Error)]
pub enum EnqueueError {
    /// An equivalent job is already waiting or active.
    #[error("Job already in flight: {existing}")]
    Duplicate { existing: JobId },

    /// The broker is unavailable; the caller should fall back to inline execution.
    #[error("Queue degraded: broker unavailable")]
    Degraded,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}
