//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Failed to fetch {location}: {reason}")]
    FetchFailed { location: String, reason: String },

    #[error("Fetching {location} timed out after {secs} seconds")]
    FetchTimeout { location: String, secs: u64 },

    #[error("Failed to decode image {location}: {reason}")]
    DecodeFailed { location: String, reason: String },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    pub fn fetch_failed(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::FetchFailed {
            location: location.into(),
            reason: reason.into(),
        }
    }

    pub fn decode_failed(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DecodeFailed {
            location: location.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Encoder diagnostics as reported by the tool, or the error text.
    pub fn diagnostics(&self) -> String {
        match self {
            MediaError::FfmpegFailed {
                stderr: Some(stderr),
                ..
            }
            | MediaError::FfprobeFailed {
                stderr: Some(stderr),
                ..
            } if !stderr.trim().is_empty() => stderr.trim().to_string(),
            other => other.to_string(),
        }
    }

    /// True for network failures that may succeed on another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MediaError::FetchTimeout { .. } | MediaError::FetchFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostics_prefer_stderr() {
        let err = MediaError::ffmpeg_failed(
            "FFmpeg exited with non-zero status",
            Some("Unknown encoder 'libx265'\n".to_string()),
            Some(1),
        );
        assert_eq!(err.diagnostics(), "Unknown encoder 'libx265'");

        let err = MediaError::ffmpeg_failed("FFmpeg exited with non-zero status", None, Some(1));
        assert_eq!(err.diagnostics(), "FFmpeg command failed: FFmpeg exited with non-zero status");
    }
}
