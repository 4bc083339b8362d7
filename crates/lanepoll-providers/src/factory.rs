#[cfg(feature = "provider-memory")]
use crate::MemoryProvider;
#[cfg(feature = "provider-sqs")]
use crate::{SqsProvider, SqsProviderConfig};
use lanepoll_core::{ConsumerError, ConsumerResult, Provider, ProviderBackend, ProviderConfig};
use std::sync::Arc;

/// Create a queue provider based on configuration
pub async fn create_provider(config: &ProviderConfig) -> ConsumerResult<Arc<dyn Provider>> {
    config.validate()?;

    match config.backend {
        #[cfg(feature = "provider-sqs")]
        ProviderBackend::Sqs => {
            let sqs_config = SqsProviderConfig::from_provider_config(config)?;
            let provider =
                SqsProvider::from_env(sqs_config, config.sqs_endpoint_url.clone()).await?;
            Ok(Arc::new(provider))
        }

        #[cfg(not(feature = "provider-sqs"))]
        ProviderBackend::Sqs => Err(ConsumerError::configuration(
            "SQS provider not available (provider-sqs feature not enabled)",
        )),

        #[cfg(feature = "provider-memory")]
        ProviderBackend::Memory => {
            let mut provider = MemoryProvider::new(config.max_messages_per_request)?;
            if config.memory_dead_letter {
                provider = provider.with_dead_letter_queue();
            }
            tracing::info!(
                batch_limit = config.max_messages_per_request,
                dead_letter = config.memory_dead_letter,
                "In-memory provider initialized"
            );
            Ok(Arc::new(provider))
        }

        #[cfg(not(feature = "provider-memory"))]
        ProviderBackend::Memory => Err(ConsumerError::configuration(
            "Memory provider not available (provider-memory feature not enabled)",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "provider-memory")]
    #[tokio::test]
    async fn memory_backend_honours_config() {
        let config = ProviderConfig {
            max_messages_per_request: 4,
            memory_dead_letter: true,
            ..Default::default()
        };
        let provider = create_provider(&config).await.unwrap();
        assert_eq!(provider.batch_limit(), 4);
        assert!(provider.has_dead_letter_target());
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_connecting() {
        let config = ProviderConfig {
            backend: ProviderBackend::Sqs,
            ..Default::default()
        };
        let result = create_provider(&config).await;
        assert!(matches!(result, Err(ConsumerError::Configuration(_))));
    }
}
