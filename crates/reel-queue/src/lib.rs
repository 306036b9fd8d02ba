//! Durable job queue on Redis Streams.
//!
//! This crate provides:
//! - `ConnectionManager`: supervised broker connection with an availability gate
//! - `Broker`: publish/consume/ack/reject over Redis Streams, plus an in-memory broker
//! - `QueueMessage` envelope and the explicit `Attempt` retry counter
//! - `JobProducer`: deduplicating enqueue backed by the job record store

pub mod broker;
pub mod connection;
pub mod error;
pub mod memory;
pub mod message;
pub mod metrics;
pub mod producer;

pub use broker::{Broker, RedisBroker};
pub use connection::{ConnectionConfig, ConnectionManager};
pub use error::{EnqueueError, QueueError, QueueResult};
pub use memory::{DeadLetter, MemoryBroker};
pub use message::{
    Attempt, ContentGenerationJob, Delivery, JobPayload, MediaAcquisitionJob, QueueMessage,
    RETRY_HEADER,
};
pub use producer::JobProducer;
