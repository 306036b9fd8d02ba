//! Worker error types.

use thiserror::Error;

use reel_media::MediaError;
use reel_models::ProductId;
use reel_queue::QueueError;
use reel_services::ServiceError;
use reel_storage::StorageError;
use reel_store::StoreError;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// How a failure is treated by the retry coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed input. Never retried.
    Validation,
    /// Referenced record is missing. Terminal.
    NotFound,
    /// External dependency failed; another attempt may succeed.
    Transient,
    /// Media tool failure; retried since resource pressure may clear.
    Encoding,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Validation => "validation",
            ErrorClass::NotFound => "not_found",
            ErrorClass::Transient => "transient",
            ErrorClass::Encoding => "encoding",
        }
    }

    /// Whether a retry can change the outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::Transient | ErrorClass::Encoding)
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Invalid job: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("no images available for product {0}")]
    NoImages(ProductId),

    #[error("scene {index} failed: {source}")]
    Scene {
        index: usize,
        #[source]
        source: MediaError,
    },

    #[error("Encoding failed: {0}")]
    Encoding(#[source] MediaError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Result serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WorkerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn scene(index: usize, source: MediaError) -> Self {
        Self::Scene { index, source }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            WorkerError::Validation(_) => ErrorClass::Validation,
            WorkerError::NotFound(_) | WorkerError::NoImages(_) => ErrorClass::NotFound,
            WorkerError::Scene { source, .. } if source.is_transient() => ErrorClass::Transient,
            WorkerError::Scene { .. } | WorkerError::Encoding(_) => ErrorClass::Encoding,
            WorkerError::Service(e) => match e {
                ServiceError::NotConfigured(_) => ErrorClass::Validation,
                ServiceError::Http { status, .. } if (400..500).contains(status) && *status != 429 => {
                    ErrorClass::Validation
                }
                _ => ErrorClass::Transient,
            },
            WorkerError::Store(StoreError::NotFound(_)) => ErrorClass::NotFound,
            WorkerError::Store(_) => ErrorClass::Transient,
            WorkerError::Storage(StorageError::InvalidKey(_)) => ErrorClass::Validation,
            WorkerError::Storage(_) => ErrorClass::Transient,
            WorkerError::Media(e) if e.is_transient() => ErrorClass::Transient,
            WorkerError::Media(_) => ErrorClass::Encoding,
            WorkerError::Queue(_) | WorkerError::Io(_) => ErrorClass::Transient,
            WorkerError::Serialization(_) => ErrorClass::Validation,
        }
    }

    /// Text written to the job record. Encoder diagnostics are kept verbatim.
    pub fn job_error(&self) -> String {
        match self {
            WorkerError::Encoding(e) => e.diagnostics(),
            WorkerError::Scene { index, source } => format!("scene {}: {}", index, source.diagnostics()),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(
            WorkerError::NoImages(ProductId::from_string("p")).class(),
            ErrorClass::NotFound
        );
        assert_eq!(WorkerError::validation("bad").class(), ErrorClass::Validation);

        let timeout = MediaError::FetchTimeout {
            location: "https://cdn/a.jpg".into(),
            secs: 30,
        };
        assert_eq!(WorkerError::scene(2, timeout).class(), ErrorClass::Transient);

        let decode = MediaError::decode_failed("a.jpg", "bad header");
        assert_eq!(WorkerError::scene(0, decode).class(), ErrorClass::Encoding);

        let service = ServiceError::Timeout {
            service: "text",
            secs: 60,
        };
        assert_eq!(WorkerError::from(service).class(), ErrorClass::Transient);
        assert!(!ErrorClass::NotFound.is_retryable());
    }

    #[test]
    fn test_job_error_keeps_encoder_diagnostics() {
        let err = WorkerError::Encoding(MediaError::ffmpeg_failed(
            "FFmpeg exited with non-zero status",
            Some("[libx264 @ 0x1] height not divisible by 2\n".into()),
            Some(1),
        ));
        assert_eq!(err.job_error(), "[libx264 @ 0x1] height not divisible by 2");

        let missing = WorkerError::NoImages(ProductId::from_string("p9"));
        assert!(missing.job_error().contains("no images"));
    }

    #[test]
    fn test_scene_error_names_index() {
        let err = WorkerError::scene(3, MediaError::fetch_failed("https://x/y.jpg", "HTTP 404"));
        assert!(err.job_error().starts_with("scene 3"));
    }
}
