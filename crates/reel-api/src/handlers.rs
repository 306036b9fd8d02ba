//! Request handlers.

pub mod health;
pub mod jobs;
pub mod queue;

pub use health::*;
pub use jobs::*;
pub use queue::*;
