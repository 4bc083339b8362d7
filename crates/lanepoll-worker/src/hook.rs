//! Caller-supplied callbacks
//!
//! The host application registers one processing hook and, optionally, one error
//! observer. The hook receives each non-empty batch together with the lane that
//! fetched it and must eventually call `Consumer::finish` (and `Consumer::dead_letter`
//! when applicable) with that lane id.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

use lanepoll_core::{ConsumerError, LaneId, Message};

/// Processing hook invoked once per non-empty batch
pub type ProcessHook =
    Arc<dyn Fn(Vec<Message>, LaneId) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Single observer slot for fatal errors
pub type ErrorObserver = Arc<dyn Fn(&ConsumerError) + Send + Sync>;

pub(crate) fn boxed_hook<F, Fut>(hook: F) -> ProcessHook
where
    F: Fn(Vec<Message>, LaneId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |messages, lane_id| Box::pin(hook(messages, lane_id)))
}
