//! Error types module
//!
//! All consumer, provider and batching failures are unified under [`ConsumerError`].
//! Configuration and argument errors are surfaced synchronously to the caller and
//! never retried. Backend and hook errors are caught at the lane boundary and stop
//! the whole polling session.

/// Errors raised by the consumer, the chunk batcher and queue providers
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Backend error during {operation}: {source}")]
    Backend {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("Processing hook failed: {0}")]
    Hook(#[source] anyhow::Error),
}

/// Result type for consumer and provider operations
pub type ConsumerResult<T> = Result<T, ConsumerError>;

impl ConsumerError {
    /// Wrap a backend failure for the named operation (e.g. "fetch", "acknowledge")
    pub fn backend(operation: &'static str, err: impl Into<anyhow::Error>) -> Self {
        ConsumerError::Backend {
            operation,
            source: err.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        ConsumerError::Configuration(message.into())
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        ConsumerError::InvalidArgument(message.into())
    }

    /// Whether this error stops a running session when it reaches a lane.
    ///
    /// Configuration and argument errors are returned to the caller directly and
    /// only become fatal when they surface inside a lane.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConsumerError::Backend { .. } | ConsumerError::Hook(_))
    }

    /// Machine-readable error code, used as a structured log field
    pub fn error_code(&self) -> &'static str {
        match self {
            ConsumerError::Configuration(_) => "CONFIGURATION_ERROR",
            ConsumerError::InvalidArgument(_) => "INVALID_ARGUMENT",
            ConsumerError::Backend { .. } => "BACKEND_ERROR",
            ConsumerError::Hook(_) => "HOOK_ERROR",
        }
    }
}
