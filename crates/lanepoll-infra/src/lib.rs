//! Lanepoll Infrastructure Library
//!
//! Shared infrastructure used by Lanepoll services and tests:
//! - Telemetry initialization (tracing subscriber with `RUST_LOG` filtering)

#[cfg(feature = "observability-basic")]
pub mod telemetry;

// Re-export commonly used types
#[cfg(feature = "observability-basic")]
pub use telemetry::init_telemetry;
