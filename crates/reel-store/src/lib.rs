//! Job record store and product store.
//!
//! This crate provides:
//! - `JobStore`: durable job records with single-open-job enforcement
//! - `ProductStore`: products plus read-only templates and music tracks
//! - A Redis backend where each transition and its product mirror run as one script
//! - An in-memory backend for tests and local runs

pub mod error;
pub mod keys;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use keys::{Keys, StoreConfig};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use store::{InsertOutcome, JobStore, ProductStore, Transition};
