//! Shared data models for the Reel backend.
//!
//! This crate provides Serde-serializable types for:
//! - Job records, job types and status counts
//! - Products (the subject of every job) and their generated content
//! - Video templates, music tracks and tonal presets
//! - Composition requests, scenes and outputs
//! - Encoding configuration

pub mod composition;
pub mod encoding;
pub mod job;
pub mod product;
pub mod template;

// Re-export common types
pub use composition::{CompositionOutput, CompositionRequest, Scene};
pub use encoding::EncodingConfig;
pub use job::{Job, JobId, JobStatus, JobType, ParseJobTypeError, StatusCounts, DEFAULT_MAX_ATTEMPTS};
pub use product::{GeneratedContent, ImageRef, ImageSource, Product, ProductId, ProductImages, ProductStatus};
pub use template::{MusicId, MusicTrack, TemplateId, TonalPreset, TransitionKind, VideoTemplate};
