//! Queue provider abstraction trait
//!
//! Backend adapters (SQS, in-memory) implement [`Provider`]. The consumer holds an
//! `Arc<dyn Provider>` and never depends on backend-specific details.

use async_trait::async_trait;

use crate::error::ConsumerResult;
use crate::message::Message;

/// Capability interface implemented by queue backends
#[async_trait]
pub trait Provider: Send + Sync {
    /// Whether a dead-letter destination is configured
    fn has_dead_letter_target(&self) -> bool;

    /// Maximum number of items returned or accepted per backend call
    fn batch_limit(&self) -> usize;

    /// Fetch up to `batch_limit()` messages; zero messages is a normal result
    async fn fetch(&self) -> ConsumerResult<Vec<Message>>;

    /// Remove messages from the source queue.
    ///
    /// Must be idempotent: acknowledging an already-removed id is a no-op.
    async fn acknowledge(&self, messages: &[Message]) -> ConsumerResult<()>;

    /// Reroute messages to the dead-letter destination.
    ///
    /// Fails with `ConsumerError::Configuration` when `has_dead_letter_target()` is false.
    async fn dead_letter(&self, messages: &[Message]) -> ConsumerResult<()>;
}
