//! Service client error types.

use thiserror::Error;

/// Result type for service calls.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors returned by the external service clients.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Service not configured: {0}")]
    NotConfigured(String),

    #[error("{service} returned HTTP {status}: {body}")]
    Http {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} timed out after {secs} seconds")]
    Timeout { service: &'static str, secs: u64 },

    #[error("{service} request failed: {reason}")]
    Network { service: &'static str, reason: String },

    #[error("{service} returned an invalid response: {reason}")]
    InvalidResponse { service: &'static str, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    pub fn invalid_response(service: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            service,
            reason: reason.into(),
        }
    }

    /// Map a reqwest error for `service`.
    pub fn from_reqwest(service: &'static str, timeout_secs: u64, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout {
                service,
                secs: timeout_secs,
            }
        } else if e.is_decode() {
            Self::invalid_response(service, e.to_string())
        } else {
            Self::Network {
                service,
                reason: e.to_string(),
            }
        }
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Timeout { .. } | ServiceError::Network { .. } => true,
            ServiceError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
