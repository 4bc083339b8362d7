//! Test helpers: a recording provider over the in-memory queue and small polling
//! utilities for paused-clock tests.
//!
//! Run from workspace root: `cargo test -p lanepoll-worker --test consumer_test`.

use async_trait::async_trait;
use lanepoll_providers::{MemoryProvider, Provider};
use lanepoll_worker::{ConsumerConfig, ConsumerResult, Message};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Wraps a `MemoryProvider` and records the ids passed to every acknowledge and
/// dead-letter call.
pub struct RecordingProvider {
    pub queue: MemoryProvider,
    acknowledge_calls: Mutex<Vec<Vec<String>>>,
    dead_letter_calls: Mutex<Vec<Vec<String>>>,
}

impl RecordingProvider {
    pub fn new(queue: MemoryProvider) -> Arc<Self> {
        Arc::new(Self {
            queue,
            acknowledge_calls: Mutex::new(Vec::new()),
            dead_letter_calls: Mutex::new(Vec::new()),
        })
    }

    pub fn acknowledge_calls(&self) -> Vec<Vec<String>> {
        self.acknowledge_calls.lock().unwrap().clone()
    }

    pub fn dead_letter_calls(&self) -> Vec<Vec<String>> {
        self.dead_letter_calls.lock().unwrap().clone()
    }
}

fn ids(messages: &[Message]) -> Vec<String> {
    messages.iter().map(|m| m.id.clone()).collect()
}

#[async_trait]
impl Provider for RecordingProvider {
    fn has_dead_letter_target(&self) -> bool {
        self.queue.has_dead_letter_target()
    }

    fn batch_limit(&self) -> usize {
        self.queue.batch_limit()
    }

    async fn fetch(&self) -> ConsumerResult<Vec<Message>> {
        self.queue.fetch().await
    }

    async fn acknowledge(&self, messages: &[Message]) -> ConsumerResult<()> {
        self.acknowledge_calls.lock().unwrap().push(ids(messages));
        self.queue.acknowledge(messages).await
    }

    async fn dead_letter(&self, messages: &[Message]) -> ConsumerResult<()> {
        self.dead_letter_calls.lock().unwrap().push(ids(messages));
        self.queue.dead_letter(messages).await
    }
}

pub fn init_tracing() {
    // Several tests share one subscriber; later calls are expected to fail.
    let _ = lanepoll_infra::init_telemetry("lanepoll=debug");
}

pub fn test_config() -> ConsumerConfig {
    ConsumerConfig {
        poll_interval_ms: 1_000,
        continuous_fetch: false,
        continuous_fetch_pause_ms: 500,
        lane_count: 1,
    }
}

/// A recording provider over a fresh queue holding `bodies`, in order
pub fn seeded_provider(batch_limit: usize, bodies: &[&str], dead_letter: bool) -> Arc<RecordingProvider> {
    let mut queue = MemoryProvider::new(batch_limit).unwrap();
    if dead_letter {
        queue = queue.with_dead_letter_queue();
    }
    for body in bodies {
        queue.enqueue(*body);
    }
    RecordingProvider::new(queue)
}

pub fn numbered_bodies(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("message {i}")).collect()
}

/// Poll `condition` every 10ms of (paused) tokio time, panicking after ten minutes.
pub async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(600);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
