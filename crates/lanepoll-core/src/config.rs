//! Configuration module
//!
//! Consumer scheduling settings and provider selection, loaded from the environment
//! (with `.env` support) or built in code.

use std::env;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ConsumerError, ConsumerResult};

// Common constants
const POLL_INTERVAL_MS: u64 = 60_000;
const CONTINUOUS_FETCH_PAUSE_MS: u64 = 20_000;
const LANE_COUNT: usize = 1;
const MAX_MESSAGES_PER_REQUEST: usize = 10;
const SQS_WAIT_TIME_SECONDS: i32 = 20;
const SQS_MAX_WAIT_TIME_SECONDS: i32 = 20;
const SQS_VISIBILITY_TIMEOUT_SECONDS: i32 = 300;

/// Upper bound on messages per backend request (SQS hard limit)
pub const MAX_BATCH_LIMIT: usize = 10;

/// Consumer scheduling configuration
#[derive(Clone, Debug, PartialEq)]
pub struct ConsumerConfig {
    /// Wait between turns when a lane ends its turn with nothing to do
    pub poll_interval_ms: u64,
    /// Keep fetching until a non-empty batch arrives
    pub continuous_fetch: bool,
    /// Pause between empty fetches and after under-capacity batches in continuous mode
    pub continuous_fetch_pause_ms: u64,
    /// Lanes started by `Consumer::poll_default`
    pub lane_count: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: POLL_INTERVAL_MS,
            continuous_fetch: false,
            continuous_fetch_pause_ms: CONTINUOUS_FETCH_PAUSE_MS,
            lane_count: LANE_COUNT,
        }
    }
}

impl ConsumerConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let config = Self {
            poll_interval_ms: env_parse("LANEPOLL_POLL_INTERVAL_MS", POLL_INTERVAL_MS)?,
            continuous_fetch: env_bool("LANEPOLL_CONTINUOUS_FETCH", false),
            continuous_fetch_pause_ms: env_parse(
                "LANEPOLL_CONTINUOUS_FETCH_PAUSE_MS",
                CONTINUOUS_FETCH_PAUSE_MS,
            )?,
            lane_count: env_parse("LANEPOLL_LANES", LANE_COUNT)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConsumerResult<()> {
        if self.lane_count == 0 {
            return Err(ConsumerError::configuration(
                "LANEPOLL_LANES must be at least 1",
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn continuous_fetch_pause(&self) -> Duration {
        Duration::from_millis(self.continuous_fetch_pause_ms)
    }
}

/// Queue backend types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderBackend {
    Memory,
    Sqs,
}

impl FromStr for ProviderBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(ProviderBackend::Memory),
            "sqs" => Ok(ProviderBackend::Sqs),
            _ => Err(anyhow::anyhow!("Invalid provider backend: {}", s)),
        }
    }
}

impl Display for ProviderBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ProviderBackend::Memory => write!(f, "memory"),
            ProviderBackend::Sqs => write!(f, "sqs"),
        }
    }
}

/// Provider selection and backend settings
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderConfig {
    pub backend: ProviderBackend,
    pub max_messages_per_request: usize,
    pub sqs_main_queue_url: Option<String>,
    pub sqs_dead_queue_url: Option<String>,
    /// Custom endpoint for SQS-compatible services (e.g. LocalStack)
    pub sqs_endpoint_url: Option<String>,
    pub sqs_wait_time_seconds: i32,
    pub sqs_visibility_timeout_seconds: i32,
    pub sqs_message_attribute_names: Vec<String>,
    pub sqs_system_attribute_names: Vec<String>,
    /// Give the in-memory backend a dead-letter queue
    pub memory_dead_letter: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            backend: ProviderBackend::Memory,
            max_messages_per_request: MAX_MESSAGES_PER_REQUEST,
            sqs_main_queue_url: None,
            sqs_dead_queue_url: None,
            sqs_endpoint_url: None,
            sqs_wait_time_seconds: SQS_WAIT_TIME_SECONDS,
            sqs_visibility_timeout_seconds: SQS_VISIBILITY_TIMEOUT_SECONDS,
            sqs_message_attribute_names: Vec::new(),
            sqs_system_attribute_names: Vec::new(),
            memory_dead_letter: false,
        }
    }
}

impl ProviderConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let backend = env::var("LANEPOLL_PROVIDER")
            .unwrap_or_else(|_| "memory".to_string())
            .parse::<ProviderBackend>()?;

        let config = Self {
            backend,
            max_messages_per_request: env_parse(
                "LANEPOLL_MAX_MESSAGES_PER_REQUEST",
                MAX_MESSAGES_PER_REQUEST,
            )?,
            sqs_main_queue_url: env::var("SQS_MAIN_QUEUE_URL").ok(),
            sqs_dead_queue_url: env::var("SQS_DEAD_QUEUE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            sqs_endpoint_url: env::var("SQS_ENDPOINT_URL").ok(),
            sqs_wait_time_seconds: env_parse("SQS_WAIT_TIME_SECONDS", SQS_WAIT_TIME_SECONDS)?,
            sqs_visibility_timeout_seconds: env_parse(
                "SQS_VISIBILITY_TIMEOUT_SECONDS",
                SQS_VISIBILITY_TIMEOUT_SECONDS,
            )?,
            sqs_message_attribute_names: env_list("SQS_MESSAGE_ATTRIBUTE_NAMES"),
            sqs_system_attribute_names: env_list("SQS_SYSTEM_ATTRIBUTE_NAMES"),
            memory_dead_letter: env_bool("LANEPOLL_MEMORY_DEAD_LETTER", false),
        };
        config.validate()?;
        Ok(config)
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

        if self.backend == ProviderBackend::Sqs {
            if self.sqs_main_queue_url.is_none() {
                return Err(ConsumerError::configuration(
                    "SQS_MAIN_QUEUE_URL is required for the sqs provider",
                ));
            }
            if !(0..=SQS_MAX_WAIT_TIME_SECONDS).contains(&self.sqs_wait_time_seconds) {
                return Err(ConsumerError::configuration(format!(
                    "SQS_WAIT_TIME_SECONDS must be between 0 and {}",
                    SQS_MAX_WAIT_TIME_SECONDS
                )));
            }
            if self.sqs_visibility_timeout_seconds < 0 {
                return Err(ConsumerError::configuration(
                    "SQS_VISIBILITY_TIMEOUT_SECONDS cannot be negative",
                ));
            }
        }

        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T, anyhow::Error>
where
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {}", key, e)),
        Err(_) => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_list(key: &str) -> Vec<String> {
    env::var(key)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_consumer_config_is_valid() {
        let config = ConsumerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval(), Duration::from_secs(60));
        assert!(!config.continuous_fetch);
    }

    #[test]
    fn zero_lanes_rejected() {
        let config = ConsumerConfig {
            lane_count: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConsumerError::Configuration(_))
        ));
    }

    #[test]
    fn provider_backend_parses_case_insensitively() {
        assert_eq!("SQS".parse::<ProviderBackend>().unwrap(), ProviderBackend::Sqs);
        assert_eq!("memory".parse::<ProviderBackend>().unwrap(), ProviderBackend::Memory);
        assert!("redis".parse::<ProviderBackend>().is_err());
        assert_eq!(ProviderBackend::Sqs.to_string(), "sqs");
    }

    #[test]
    fn batch_limit_bounds_enforced() {
        let too_big = ProviderConfig {
            max_messages_per_request: 11,
            ..Default::default()
        };
        assert!(too_big.validate().is_err());

        let zero = ProviderConfig {
            max_messages_per_request: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn sqs_requires_main_queue_url() {
        let mut config = ProviderConfig {
            backend: ProviderBackend::Sqs,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.sqs_main_queue_url = Some("http://localhost:4566/000000000000/main".into());
        assert!(config.validate().is_ok());

        config.sqs_wait_time_seconds = 21;
        assert!(config.validate().is_err());
    }
}
