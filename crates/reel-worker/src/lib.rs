//! Job worker.
//!
//! This crate provides:
//! - One consumer per job type with bounded prefetch and stale-delivery reclaim
//! - The retry coordinator with its explicit attempt counter
//! - Progress reporting onto job records
//! - Handlers for content generation, media acquisition and video composition
//! - Inline execution for the degraded queue path

pub mod composition;
pub mod config;
pub mod consumer;
pub mod error;
pub mod handlers;
pub mod inline;
pub mod logging;
pub mod progress;
pub mod retry;

pub use composition::VideoComposer;
pub use config::{CompositionConfig, WorkerConfig};
pub use consumer::{DeliveryOutcome, WorkerConsumer};
pub use error::{ErrorClass, WorkerError, WorkerResult};
pub use handlers::{ContentHandler, Handlers, JobHandler};
pub use inline::{runs_inline, InlineExecutor};
pub use logging::JobLogger;
pub use progress::ProgressReporter;
pub use retry::RetryCoordinator;
