use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::types::{
    BatchResultErrorEntry, DeleteMessageBatchRequestEntry, MessageSystemAttributeName,
    SendMessageBatchRequestEntry,
};
use aws_sdk_sqs::Client;
use serde_json::{Map, Value};
use uuid::Uuid;

use lanepoll_core::{
    execute_waves, plan, ConsumerError, ConsumerResult, Message, Provider, ProviderConfig,
    MAX_BATCH_LIMIT,
};

const MAX_WAIT_TIME_SECONDS: i32 = 20;
const MAX_VISIBILITY_TIMEOUT_SECONDS: i32 = 300;
/// Concurrent batch requests per wave
const MAX_CONCURRENT_REQUESTS: usize = 5;

pub const RECEIPT_HANDLE_ATTRIBUTE: &str = "ReceiptHandle";

/// Delete failure codes meaning the message is already gone from the queue
const ALREADY_DELETED_CODES: &[&str] = &[
    "ReceiptHandleIsInvalid",
    "AWS.SimpleQueueService.ReceiptHandleIsInvalid",
];

/// Failed delete entries that are real failures rather than repeated deletes
fn unexpected_delete_failures(failed: &[BatchResultErrorEntry]) -> Vec<&BatchResultErrorEntry> {
    failed
        .iter()
        .filter(|entry| !ALREADY_DELETED_CODES.contains(&entry.code()))
        .collect()
}

/// SQS provider settings
#[derive(Clone, Debug)]
pub struct SqsProviderConfig {
    pub main_queue_url: String,
    pub dead_queue_url: Option<String>,
    pub wait_time_seconds: i32,
    pub visibility_timeout_seconds: i32,
    pub max_messages_per_request: usize,
    pub message_attribute_names: Vec<String>,
    pub system_attribute_names: Vec<String>,
}

impl SqsProviderConfig {
    pub fn new(main_queue_url: impl Into<String>) -> Self {
        Self {
            main_queue_url: main_queue_url.into(),
            dead_queue_url: None,
            wait_time_seconds: MAX_WAIT_TIME_SECONDS,
            visibility_timeout_seconds: MAX_VISIBILITY_TIMEOUT_SECONDS,
            max_messages_per_request: MAX_BATCH_LIMIT,
            message_attribute_names: Vec::new(),
            system_attribute_names: Vec::new(),
        }
    }

    pub fn with_dead_queue(mut self, dead_queue_url: impl Into<String>) -> Self {
        self.dead_queue_url = Some(dead_queue_url.into());
        self
    }

    pub fn from_provider_config(config: &ProviderConfig) -> ConsumerResult<Self> {
        let main_queue_url = config.sqs_main_queue_url.clone().ok_or_else(|| {
            ConsumerError::configuration("SQS_MAIN_QUEUE_URL not configured")
        })?;

        Ok(Self {
            main_queue_url,
            dead_queue_url: config.sqs_dead_queue_url.clone(),
            wait_time_seconds: config.sqs_wait_time_seconds,
            visibility_timeout_seconds: config.sqs_visibility_timeout_seconds,
            max_messages_per_request: config.max_messages_per_request,
            message_attribute_names: config.sqs_message_attribute_names.clone(),
            system_attribute_names: config.sqs_system_attribute_names.clone(),
        })
    }

    pub fn validate(&self) -> ConsumerResult<()> {
        if self.max_messages_per_request > MAX_BATCH_LIMIT {
            return Err(ConsumerError::configuration(format!(
                "Exceeded the maximum number of messages by request ({})",
                MAX_BATCH_LIMIT
            )));
        }
        if self.max_messages_per_request < 1 {
            return Err(ConsumerError::configuration(
                "The minimum number of messages by request is 1",
            ));
        }
        if !(0..=MAX_WAIT_TIME_SECONDS).contains(&self.wait_time_seconds) {
            return Err(ConsumerError::configuration(format!(
                "wait time must be between 0 and {} seconds",
                MAX_WAIT_TIME_SECONDS
            )));
        }
        if self.visibility_timeout_seconds < 0 {
            return Err(ConsumerError::configuration(
                "visibility timeout cannot be negative",
            ));
        }
        Ok(())
    }

    /// FIFO destinations need a deduplication id and a group id per entry
    fn dead_queue_is_fifo(&self) -> bool {
        self.dead_queue_url
            .as_deref()
            .is_some_and(|url| url.ends_with(".fifo"))
    }
}

/// Amazon SQS queue provider
#[derive(Clone)]
pub struct SqsProvider {
    client: Client,
    config: SqsProviderConfig,
}

impl SqsProvider {
    pub fn new(client: Client, config: SqsProviderConfig) -> ConsumerResult<Self> {
        config.validate()?;
        Ok(Self { client, config })
    }

    /// Build a client from the default AWS environment, optionally pointed at a custom
    /// endpoint (e.g. "http://localhost:4566" for LocalStack)
    pub async fn from_env(
        config: SqsProviderConfig,
        endpoint_url: Option<String>,
    ) -> ConsumerResult<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(endpoint) = endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;
        let client = Client::new(&shared);

        tracing::info!(
            main_queue_url = %config.main_queue_url,
            dead_queue_url = ?config.dead_queue_url,
            "SQS provider initialized"
        );

        Self::new(client, config)
    }

    pub fn config(&self) -> &SqsProviderConfig {
        &self.config
    }

    fn receipt_handle(message: &Message) -> ConsumerResult<&str> {
        message.attribute_str(RECEIPT_HANDLE_ATTRIBUTE).ok_or_else(|| {
            ConsumerError::invalid_argument(format!(
                "message {} has no {} attribute",
                message.id, RECEIPT_HANDLE_ATTRIBUTE
            ))
        })
    }

    fn to_message(message: aws_sdk_sqs::types::Message) -> Option<Message> {
        let id = message.message_id?;
        let mut converted = Message::new(id, message.body.unwrap_or_default());

        if let Some(handle) = message.receipt_handle {
            converted = converted.with_attribute(RECEIPT_HANDLE_ATTRIBUTE, Value::String(handle));
        }
        if let Some(md5) = message.md5_of_body {
            converted = converted.with_attribute("MD5OfBody", Value::String(md5));
        }
        if let Some(md5) = message.md5_of_message_attributes {
            converted = converted.with_attribute("MD5OfMessageAttributes", Value::String(md5));
        }
        if let Some(attributes) = message.attributes {
            let map: Map<String, Value> = attributes
                .into_iter()
                .map(|(name, value)| (name.as_str().to_string(), Value::String(value)))
                .collect();
            converted = converted.with_attribute("Attributes", Value::Object(map));
        }
        if let Some(attributes) = message.message_attributes {
            let map: Map<String, Value> = attributes
                .into_iter()
                .map(|(name, value)| {
                    let value = value
                        .string_value()
                        .map(|s| Value::String(s.to_string()))
                        .unwrap_or(Value::Null);
                    (name, value)
                })
                .collect();
            converted = converted.with_attribute("MessageAttributes", Value::Object(map));
        }

        Some(converted)
    }

    async fn delete_chunk(&self, chunk: Vec<Message>) -> ConsumerResult<()> {
        let entries = chunk
            .iter()
            .map(|message| {
                DeleteMessageBatchRequestEntry::builder()
                    .id(message.id.clone())
                    .receipt_handle(Self::receipt_handle(message)?)
                    .build()
                    .map_err(|e| ConsumerError::backend("acknowledge", e))
            })
            .collect::<ConsumerResult<Vec<_>>>()?;

        let output = self
            .client
            .delete_message_batch()
            .queue_url(&self.config.main_queue_url)
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(|e| ConsumerError::backend("acknowledge", e))?;

        let unexpected = unexpected_delete_failures(output.failed());
        let already_deleted = output.failed().len() - unexpected.len();
        if already_deleted > 0 {
            tracing::debug!(count = already_deleted, "Messages were already deleted");
        }
        if !unexpected.is_empty() {
            return Err(ConsumerError::backend(
                "acknowledge",
                std::io::Error::other(format!(
                    "{} messages could not be deleted: {:?}",
                    unexpected.len(),
                    unexpected
                )),
            ));
        }

        Ok(())
    }

    async fn send_dead_chunk(&self, dead_queue_url: &str, chunk: Vec<Message>) -> ConsumerResult<()> {
        let fifo = self.config.dead_queue_is_fifo();
        let entries = chunk
            .iter()
            .map(|message| {
                SendMessageBatchRequestEntry::builder()
                    .id(message.id.clone())
                    .message_body(message.body.clone())
                    .set_message_deduplication_id(fifo.then(|| Uuid::new_v4().to_string()))
                    .set_message_group_id(fifo.then(|| dead_queue_url.to_string()))
                    .build()
                    .map_err(|e| ConsumerError::backend("dead_letter", e))
            })
            .collect::<ConsumerResult<Vec<_>>>()?;

        let output = self
            .client
            .send_message_batch()
            .queue_url(dead_queue_url)
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(|e| ConsumerError::backend("dead_letter", e))?;

        if !output.failed().is_empty() {
            return Err(ConsumerError::backend(
                "dead_letter",
                std::io::Error::other(format!(
                    "{} messages were not sent to the dead-letter queue: {:?}",
                    output.failed().len(),
                    output.failed()
                )),
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl Provider for SqsProvider {
    fn has_dead_letter_target(&self) -> bool {
        self.config.dead_queue_url.is_some()
    }

    fn batch_limit(&self) -> usize {
        self.config.max_messages_per_request
    }

    async fn fetch(&self) -> ConsumerResult<Vec<Message>> {
        let mut request = self
            .client
            .receive_message()
            .queue_url(&self.config.main_queue_url)
            .wait_time_seconds(self.config.wait_time_seconds)
            .visibility_timeout(self.config.visibility_timeout_seconds)
            .max_number_of_messages(self.config.max_messages_per_request as i32);

        if !self.config.message_attribute_names.is_empty() {
            request = request.set_message_attribute_names(Some(
                self.config.message_attribute_names.clone(),
            ));
        }
        if !self.config.system_attribute_names.is_empty() {
            request = request.set_message_system_attribute_names(Some(
                self.config
                    .system_attribute_names
                    .iter()
                    .map(|name| MessageSystemAttributeName::from(name.as_str()))
                    .collect(),
            ));
        }

        let output = request
            .send()
            .await
            .map_err(|e| ConsumerError::backend("fetch", e))?;

        let messages: Vec<Message> = output
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(Self::to_message)
            .collect();

        tracing::trace!(count = messages.len(), "Received SQS messages");
        Ok(messages)
    }

    async fn acknowledge(&self, messages: &[Message]) -> ConsumerResult<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let waves = plan(messages, MAX_BATCH_LIMIT, MAX_CONCURRENT_REQUESTS)?;
        execute_waves(waves, |chunk| self.delete_chunk(chunk)).await
    }

    /// Send messages to the dead-letter queue, then remove them from the main queue.
    async fn dead_letter(&self, messages: &[Message]) -> ConsumerResult<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let dead_queue_url = self.config.dead_queue_url.as_deref().ok_or_else(|| {
            ConsumerError::configuration("Need to pass 'dead_queue_url' in SQS config")
        })?;

        let waves = plan(messages, MAX_BATCH_LIMIT, MAX_CONCURRENT_REQUESTS)?;
        execute_waves(waves, |chunk| self.send_dead_chunk(dead_queue_url, chunk)).await?;

        self.acknowledge(messages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_rejects_out_of_range_batch() {
        let mut config = SqsProviderConfig::new("http://localhost:4566/000000000000/main");
        assert!(config.validate().is_ok());

        config.max_messages_per_request = 11;
        assert!(config.validate().is_err());

        config.max_messages_per_request = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_rejects_long_wait_time() {
        let mut config = SqsProviderConfig::new("http://localhost:4566/000000000000/main");
        config.wait_time_seconds = 21;
        assert!(config.validate().is_err());
    }

    #[test]
    fn fifo_detection_uses_dead_queue_suffix() {
        let config = SqsProviderConfig::new("main").with_dead_queue("http://x/dead.fifo");
        assert!(config.dead_queue_is_fifo());

        let config = SqsProviderConfig::new("main").with_dead_queue("http://x/dead");
        assert!(!config.dead_queue_is_fifo());

        assert!(!SqsProviderConfig::new("main").dead_queue_is_fifo());
    }

    #[test]
    fn from_provider_config_requires_main_queue() {
        let config = ProviderConfig::default();
        assert!(SqsProviderConfig::from_provider_config(&config).is_err());

        let config = ProviderConfig {
            sqs_main_queue_url: Some("http://localhost:4566/000000000000/main".into()),
            sqs_dead_queue_url: Some("http://localhost:4566/000000000000/dead".into()),
            ..Default::default()
        };
        let sqs = SqsProviderConfig::from_provider_config(&config).unwrap();
        assert_eq!(sqs.max_messages_per_request, 10);
        assert_eq!(sqs.wait_time_seconds, 20);
        assert!(sqs.dead_queue_url.is_some());
    }

    #[test]
    fn sdk_message_maps_id_body_and_receipt_handle() {
        let sdk_message = aws_sdk_sqs::types::Message::builder()
            .message_id("abc")
            .body("payload")
            .receipt_handle("rh-1")
            .md5_of_body("d41d8cd98f00b204e9800998ecf8427e")
            .build();

        let message = SqsProvider::to_message(sdk_message).unwrap();
        assert_eq!(message.id, "abc");
        assert_eq!(message.body, "payload");
        assert_eq!(SqsProvider::receipt_handle(&message).unwrap(), "rh-1");
        assert!(message.attribute("MD5OfBody").is_some());
    }

    fn failed_entry(id: &str, code: &str, sender_fault: bool) -> BatchResultErrorEntry {
        BatchResultErrorEntry::builder()
            .id(id)
            .code(code)
            .sender_fault(sender_fault)
            .build()
            .unwrap()
    }

    #[test]
    fn invalid_receipt_handles_count_as_already_deleted() {
        let failed = vec![
            failed_entry("a", "ReceiptHandleIsInvalid", true),
            failed_entry("b", "AWS.SimpleQueueService.ReceiptHandleIsInvalid", true),
        ];
        assert!(unexpected_delete_failures(&failed).is_empty());
    }

    #[test]
    fn throttling_and_internal_errors_are_real_failures() {
        let failed = vec![
            failed_entry("a", "ReceiptHandleIsInvalid", true),
            failed_entry("b", "RequestThrottled", false),
            failed_entry("c", "InternalError", false),
        ];
        let unexpected = unexpected_delete_failures(&failed);
        let ids: Vec<&str> = unexpected.iter().map(|entry| entry.id()).collect();
        assert_eq!(ids, ["b", "c"]);
    }

    #[test]
    fn sdk_message_without_id_is_skipped() {
        let sdk_message = aws_sdk_sqs::types::Message::builder().body("orphan").build();
        assert!(SqsProvider::to_message(sdk_message).is_none());
    }
}
