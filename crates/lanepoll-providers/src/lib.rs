//! Lanepoll Providers Library
//!
//! Queue backends implementing the `lanepoll_core::Provider` trait: an in-memory
//! queue for tests and local development, and Amazon SQS. Backends are feature-gated;
//! [`create_provider`] picks one from a `ProviderConfig`.

pub mod factory;
#[cfg(feature = "provider-memory")]
pub mod memory;
#[cfg(feature = "provider-sqs")]
pub mod sqs;

// Re-export commonly used types
pub use factory::create_provider;
pub use lanepoll_core::{Provider, ProviderBackend};
#[cfg(feature = "provider-memory")]
pub use memory::MemoryProvider;
#[cfg(feature = "provider-sqs")]
pub use sqs::{SqsProvider, SqsProviderConfig};
