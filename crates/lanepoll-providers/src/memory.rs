use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use lanepoll_core::{
    execute_waves, plan, ConsumerError, ConsumerResult, Message, Provider, MAX_BATCH_LIMIT,
};

/// Concurrent chunk submissions per wave
const MAX_CONCURRENT_REQUESTS: usize = 5;

#[derive(Default)]
struct MemoryQueues {
    visible: VecDeque<Message>,
    in_flight: HashMap<String, Message>,
    dead: Vec<Message>,
    acknowledged: Vec<String>,
    acknowledge_chunks: Vec<Vec<String>>,
    acknowledge_waves: usize,
    dead_letter_calls: usize,
    dead_letter_chunks: Vec<Vec<String>>,
    fetch_count: usize,
    failing: HashSet<&'static str>,
}

/// In-memory queue provider
///
/// Fetched messages move to an in-flight set until acknowledged, mirroring a
/// visibility timeout that never expires on its own; `release_in_flight` makes them
/// visible again. Intended for tests and local development.
#[derive(Clone)]
pub struct MemoryProvider {
    queues: Arc<Mutex<MemoryQueues>>,
    batch_limit: usize,
    dead_letter_enabled: bool,
}

impl MemoryProvider {
    /// Create a provider returning at most `batch_limit` messages per fetch (1..=10)
    pub fn new(batch_limit: usize) -> ConsumerResult<Self> {
        if batch_limit > MAX_BATCH_LIMIT {
            return Err(ConsumerError::configuration(format!(
                "Exceeded the maximum number of messages by request ({})",
                MAX_BATCH_LIMIT
            )));
        }
        if batch_limit < 1 {
            return Err(ConsumerError::configuration(
                "The minimum number of messages by request is 1",
            ));
        }

        Ok(Self {
            queues: Arc::new(Mutex::new(MemoryQueues::default())),
            batch_limit,
            dead_letter_enabled: false,
        })
    }

    /// Enable the dead-letter queue
    pub fn with_dead_letter_queue(mut self) -> Self {
        self.dead_letter_enabled = true;
        self
    }

    fn queues(&self) -> MutexGuard<'_, MemoryQueues> {
        // A panicking test thread must not wedge every other user of the queue.
        self.queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue a body under a fresh id and return the id
    pub fn enqueue(&self, body: impl Into<String>) -> String {
        let id = Uuid::new_v4().to_string();
        self.enqueue_message(Message::new(id.clone(), body));
        id
    }

    pub fn enqueue_message(&self, message: Message) {
        self.queues().visible.push_back(message);
    }

    /// Number of visible (not yet fetched) messages
    pub fn len(&self) -> usize {
        self.queues().visible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.queues().in_flight.len()
    }

    /// Make every fetched but unacknowledged message visible again
    pub fn release_in_flight(&self) -> usize {
        let mut queues = self.queues();
        let released: Vec<Message> = queues.in_flight.drain().map(|(_, m)| m).collect();
        let count = released.len();
        queues.visible.extend(released);
        count
    }

    pub fn dead_letters(&self) -> Vec<Message> {
        self.queues().dead.clone()
    }

    pub fn acknowledged_ids(&self) -> Vec<String> {
        self.queues().acknowledged.clone()
    }

    /// Ids of each acknowledge request, in submission order
    pub fn acknowledge_chunks(&self) -> Vec<Vec<String>> {
        self.queues().acknowledge_chunks.clone()
    }

    pub fn acknowledge_waves(&self) -> usize {
        self.queues().acknowledge_waves
    }

    pub fn dead_letter_calls(&self) -> usize {
        self.queues().dead_letter_calls
    }

    /// Ids of each dead-letter request, in submission order
    pub fn dead_letter_chunks(&self) -> Vec<Vec<String>> {
        self.queues().dead_letter_chunks.clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.queues().fetch_count
    }

    /// Make `operation` ("fetch", "acknowledge" or "dead_letter") fail until cleared
    pub fn fail_operation(&self, operation: &'static str) {
        self.queues().failing.insert(operation);
    }

    pub fn clear_failures(&self) {
        self.queues().failing.clear();
    }

    fn check_failure(&self, operation: &'static str) -> ConsumerResult<()> {
        if self.queues().failing.contains(operation) {
            return Err(ConsumerError::backend(
                operation,
                std::io::Error::other("injected failure"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    fn has_dead_letter_target(&self) -> bool {
        self.dead_letter_enabled
    }

    fn batch_limit(&self) -> usize {
        self.batch_limit
    }

    async fn fetch(&self) -> ConsumerResult<Vec<Message>> {
        self.check_failure("fetch")?;

        let mut queues = self.queues();
        queues.fetch_count += 1;
        let take = queues.visible.len().min(self.batch_limit);
        let batch: Vec<Message> = queues.visible.drain(..take).collect();
        for message in &batch {
            queues.in_flight.insert(message.id.clone(), message.clone());
        }
        Ok(batch)
    }

    async fn acknowledge(&self, messages: &[Message]) -> ConsumerResult<()> {
        if messages.is_empty() {
            return Ok(());
        }
        self.check_failure("acknowledge")?;

        let waves = plan(messages, self.batch_limit, MAX_CONCURRENT_REQUESTS)?;
        self.queues().acknowledge_waves += waves.len();

        execute_waves(waves, |chunk| async move {
            let mut queues = self.queues();
            let ids: Vec<String> = chunk.iter().map(|m| m.id.clone()).collect();
            for id in &ids {
                // Unknown ids were already removed; acknowledging them again is a no-op.
                if queues.in_flight.remove(id).is_some() {
                    queues.acknowledged.push(id.clone());
                }
            }
            queues.acknowledge_chunks.push(ids);
            Ok(())
        })
        .await
    }

    async fn dead_letter(&self, messages: &[Message]) -> ConsumerResult<()> {
        if messages.is_empty() {
            return Ok(());
        }
        if !self.dead_letter_enabled {
            return Err(ConsumerError::configuration(
                "memory provider has no dead-letter queue",
            ));
        }
        self.check_failure("dead_letter")?;

        let waves = plan(messages, self.batch_limit, MAX_CONCURRENT_REQUESTS)?;
        self.queues().dead_letter_calls += 1;

        execute_waves(waves, |chunk| async move {
            let mut queues = self.queues();
            let ids: Vec<String> = chunk.iter().map(|m| m.id.clone()).collect();
            for message in chunk {
                queues.in_flight.remove(&message.id);
                queues.dead.push(message);
            }
            queues.dead_letter_chunks.push(ids);
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_limit_bounds() {
        assert!(MemoryProvider::new(0).is_err());
        assert!(MemoryProvider::new(11).is_err());
        assert!(MemoryProvider::new(10).is_ok());
    }

    #[tokio::test]
    async fn fetch_respects_batch_limit_and_order() {
        let provider = MemoryProvider::new(3).unwrap();
        let ids: Vec<String> = (0..5).map(|i| provider.enqueue(format!("m{i}"))).collect();

        let first = provider.fetch().await.unwrap();
        let second = provider.fetch().await.unwrap();
        let third = provider.fetch().await.unwrap();

        assert_eq!(first.len(), 3);
        assert_eq!(second.len(), 2);
        assert!(third.is_empty());
        let fetched: Vec<String> = first.iter().chain(&second).map(|m| m.id.clone()).collect();
        assert_eq!(fetched, ids);
        assert_eq!(provider.in_flight(), 5);
    }

    #[tokio::test]
    async fn acknowledge_is_idempotent() {
        let provider = MemoryProvider::new(10).unwrap();
        provider.enqueue("a");
        provider.enqueue("b");
        let batch = provider.fetch().await.unwrap();

        provider.acknowledge(&batch).await.unwrap();
        provider.acknowledge(&batch).await.unwrap();

        assert_eq!(provider.acknowledged_ids().len(), 2);
        assert_eq!(provider.in_flight(), 0);
        assert_eq!(provider.acknowledge_chunks().len(), 2);
    }

    #[tokio::test]
    async fn acknowledge_chunks_by_batch_limit() {
        let provider = MemoryProvider::new(10).unwrap();
        for i in 0..23 {
            provider.enqueue(format!("m{i}"));
        }
        let mut all = Vec::new();
        loop {
            let batch = provider.fetch().await.unwrap();
            if batch.is_empty() {
                break;
            }
            all.extend(batch);
        }

        provider.acknowledge(&all).await.unwrap();

        let sizes: Vec<usize> = provider.acknowledge_chunks().iter().map(Vec::len).collect();
        assert_eq!(sizes, [10, 10, 3]);
        assert_eq!(provider.acknowledge_waves(), 1);
    }

    #[tokio::test]
    async fn dead_letter_requires_target() {
        let provider = MemoryProvider::new(10).unwrap();
        provider.enqueue("a");
        let batch = provider.fetch().await.unwrap();

        let err = provider.dead_letter(&batch).await.unwrap_err();
        assert!(matches!(err, ConsumerError::Configuration(_)));

        let provider = provider.with_dead_letter_queue();
        provider.dead_letter(&batch).await.unwrap();
        assert_eq!(provider.dead_letters().len(), 1);
        assert_eq!(provider.in_flight(), 0);
    }

    #[tokio::test]
    async fn dead_letter_chunks_by_batch_limit() {
        let provider = MemoryProvider::new(4).unwrap().with_dead_letter_queue();
        for i in 0..10 {
            provider.enqueue(format!("m{i}"));
        }
        let mut all = Vec::new();
        for _ in 0..3 {
            all.extend(provider.fetch().await.unwrap());
        }

        provider.dead_letter(&all).await.unwrap();

        let sizes: Vec<usize> = provider.dead_letter_chunks().iter().map(Vec::len).collect();
        assert_eq!(sizes, [4, 4, 2]);
        assert_eq!(provider.dead_letter_calls(), 1);
        let dead_ids: Vec<String> = provider.dead_letters().iter().map(|m| m.id.clone()).collect();
        let fetched_ids: Vec<String> = all.iter().map(|m| m.id.clone()).collect();
        assert_eq!(dead_ids, fetched_ids);
        assert_eq!(provider.in_flight(), 0);
    }

    #[tokio::test]
    async fn injected_failures_surface_as_backend_errors() {
        let provider = MemoryProvider::new(10).unwrap();
        provider.enqueue("a");
        provider.fail_operation("fetch");
        assert!(matches!(
            provider.fetch().await,
            Err(ConsumerError::Backend { operation: "fetch", .. })
        ));

        provider.clear_failures();
        assert_eq!(provider.fetch().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn release_in_flight_makes_messages_visible_again() {
        let provider = MemoryProvider::new(10).unwrap();
        provider.enqueue("a");
        provider.fetch().await.unwrap();
        assert!(provider.is_empty());

        assert_eq!(provider.release_in_flight(), 1);
        assert_eq!(provider.len(), 1);
    }
}
