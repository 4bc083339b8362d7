//! Lanepoll Core Library
//!
//! This crate provides the message model, the `Provider` capability trait that queue
//! backends implement, the chunk batcher used for batched acknowledgment and
//! dead-lettering, the shared error type and configuration.

pub mod batch;
pub mod config;
pub mod error;
pub mod message;
pub mod provider;

// Re-export commonly used types
pub use batch::{execute_waves, plan, Wave};
pub use config::{ConsumerConfig, ProviderBackend, ProviderConfig, MAX_BATCH_LIMIT};
pub use error::{ConsumerError, ConsumerResult};
pub use message::{CycleResult, LaneId, Message};
pub use provider::Provider;
