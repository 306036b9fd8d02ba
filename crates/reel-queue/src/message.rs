//! Message envelope, attempt counter and deliveries.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use reel_models::{CompositionRequest, JobId, JobType, ProductId};

use crate::error::QueueError;

/// Stream entry field holding the JSON envelope.
pub const BODY_FIELD: &str = "body";
/// Stream entry field holding the message priority.
pub const PRIORITY_FIELD: &str = "priority";
/// Stream entry field holding the retry counter.
pub const RETRY_HEADER: &str = "x-retry-count";

/// Payload for a content generation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentGenerationJob {
    pub product_id: ProductId,
}

/// Payload for a media acquisition job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaAcquisitionJob {
    pub product_id: ProductId,
    /// Search query; derived from the product when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Ask the generation service for one image when search finds nothing
    #[serde(default = "default_true")]
    pub generate_fallback: bool,
}

fn default_true() -> bool {
    true
}

/// Job-type specific payload. One variant per queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    ContentGeneration(ContentGenerationJob),
    MediaAcquisition(MediaAcquisitionJob),
    VideoComposition(CompositionRequest),
}

impl JobPayload {
    pub fn job_type(&self) -> JobType {
        match self {
            JobPayload::ContentGeneration(_) => JobType::ContentGeneration,
            JobPayload::MediaAcquisition(_) => JobType::MediaAcquisition,
            JobPayload::VideoComposition(_) => JobType::VideoComposition,
        }
    }

    pub fn subject_id(&self) -> &ProductId {
        match self {
            JobPayload::ContentGeneration(j) => &j.product_id,
            JobPayload::MediaAcquisition(j) => &j.product_id,
            JobPayload::VideoComposition(r) => &r.product_id,
        }
    }
}

/// Wire envelope: payload fields plus `jobId` and `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub job_id: JobId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: JobPayload,
}

impl QueueMessage {
    pub fn new(job_id: JobId, payload: JobPayload) -> Self {
        Self {
            job_id,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn job_type(&self) -> JobType {
        self.payload.job_type()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Number of retries already spent on a message.
///
/// Only the retry coordinator advances it. Values read from a message are
/// clamped so an external producer cannot push a job past its bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Attempt(u32);

impl Attempt {
    pub fn initial() -> Self {
        Self(0)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Read the header. Missing or unparsable values count as 0.
    pub fn from_header(raw: Option<&str>, max_attempts: u32) -> Self {
        let value = raw
            .and_then(|s| s.trim().parse::<i64>().ok())
            .unwrap_or(0)
            .clamp(0, max_attempts as i64);
        Self(value as u32)
    }

    /// Whether another retry fits under the bound.
    pub fn can_retry(&self, max_attempts: u32) -> bool {
        self.0 < max_attempts
    }
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message handed to a consumer and not yet acknowledged.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Broker message id
    pub id: String,
    /// Queue the message was read from
    pub job_type: JobType,
    /// Raw entry fields
    pub fields: HashMap<String, String>,
}

impl Delivery {
    pub fn new(id: impl Into<String>, job_type: JobType, fields: HashMap<String, String>) -> Self {
        Self {
            id: id.into(),
            job_type,
            fields,
        }
    }

    pub fn body(&self) -> Option<&str> {
        self.fields.get(BODY_FIELD).map(String::as_str)
    }

    pub fn priority(&self) -> u8 {
        self.fields
            .get(PRIORITY_FIELD)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }

    pub fn attempt(&self, max_attempts: u32) -> Attempt {
        Attempt::from_header(self.fields.get(RETRY_HEADER).map(String::as_str), max_attempts)
    }

    /// Decode the envelope and check it belongs on this queue.
    pub fn parse(&self) -> Result<QueueMessage, QueueError> {
        let body = self
            .body()
            .ok_or_else(|| QueueError::malformed(&self.id, "missing body"))?;
        let message: QueueMessage = serde_json::from_str(body)
            .map_err(|e| QueueError::malformed(&self.id, e.to_string()))?;
        if message.job_type() != self.job_type {
            return Err(QueueError::malformed(
                &self.id,
                format!(
                    "{} payload on {} queue",
                    message.job_type(),
                    self.job_type
                ),
            ));
        }
        Ok(message)
    }

    /// Decoded envelope without the queue check; `None` when the body is not an envelope.
    pub fn message(&self) -> Option<QueueMessage> {
        serde_json::from_str(self.body()?).ok()
    }

    /// Best-effort job id from a body that failed to parse.
    pub fn salvage_job_id(&self) -> Option<JobId> {
        let value: serde_json::Value = serde_json::from_str(self.body()?).ok()?;
        value
            .get("jobId")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(JobId::from_string)
    }
}

/// Entry fields for a publish.
pub fn entry_fields(message: &QueueMessage, priority: u8, attempt: Attempt) -> Result<Vec<(&'static str, String)>, serde_json::Error> {
    Ok(vec![
        (BODY_FIELD, message.to_json()?),
        (PRIORITY_FIELD, priority.to_string()),
        (RETRY_HEADER, attempt.to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::TemplateId;

    fn composition() -> QueueMessage {
        QueueMessage::new(
            JobId::from_string("j1"),
            JobPayload::VideoComposition(CompositionRequest::new(
                ProductId::from_string("p1"),
                TemplateId::from_string("t1"),
            )),
        )
    }

    fn delivery(job_type: JobType, fields: &[(&str, &str)]) -> Delivery {
        Delivery::new(
            "1-0",
            job_type,
            fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        )
    }

    #[test]
    fn test_envelope_wire_format() {
        let json: serde_json::Value = serde_json::from_str(&composition().to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "video_composition");
        assert_eq!(json["jobId"], "j1");
        assert_eq!(json["productId"], "p1");
        assert_eq!(json["templateId"], "t1");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_attempt_header_is_clamped() {
        assert_eq!(Attempt::from_header(None, 3).value(), 0);
        assert_eq!(Attempt::from_header(Some("two"), 3).value(), 0);
        assert_eq!(Attempt::from_header(Some("-4"), 3).value(), 0);
        assert_eq!(Attempt::from_header(Some("2"), 3).value(), 2);
        assert_eq!(Attempt::from_header(Some("999"), 3).value(), 3);
        assert!(Attempt::from_header(Some("2"), 3).can_retry(3));
        assert!(!Attempt::from_header(Some("3"), 3).can_retry(3));
        assert_eq!(Attempt::initial().next().value(), 1);
    }

    #[test]
    fn test_delivery_parse() {
        let body = composition().to_json().unwrap();
        let ok = delivery(JobType::VideoComposition, &[(BODY_FIELD, &body), (RETRY_HEADER, "1")]);
        assert_eq!(ok.parse().unwrap(), composition());
        assert_eq!(ok.attempt(3).value(), 1);

        let wrong_queue = delivery(JobType::ContentGeneration, &[(BODY_FIELD, &body)]);
        assert!(matches!(wrong_queue.parse(), Err(QueueError::Malformed { .. })));

        let garbage = delivery(JobType::VideoComposition, &[(BODY_FIELD, "\u{0}not json")]);
        assert!(garbage.parse().is_err());
        assert!(garbage.salvage_job_id().is_none());

        let missing = delivery(JobType::VideoComposition, &[]);
        assert!(missing.parse().is_err());
    }

    #[test]
    fn test_salvage_job_id_from_partial_body() {
        let d = delivery(
            JobType::ContentGeneration,
            &[(BODY_FIELD, r#"{"jobId":"abc","type":"content_generation"}"#)],
        );
        assert!(d.parse().is_err());
        assert_eq!(d.salvage_job_id(), Some(JobId::from_string("abc")));
    }

    #[test]
    fn test_media_payload_defaults() {
        let json = r#"{"jobId":"j","timestamp":"2024-01-01T00:00:00Z","type":"media_acquisition","productId":"p"}"#;
        let message: QueueMessage = serde_json::from_str(json).unwrap();
        match message.payload {
            JobPayload::MediaAcquisition(j) => {
                assert!(j.generate_fallback);
                assert!(j.query.is_none());
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }
}
