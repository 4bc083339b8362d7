use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing with an `EnvFilter` taken from `RUST_LOG`, falling back to
/// `default_filter` (e.g. "lanepoll=debug").
///
/// Returns an error if a global subscriber is already installed, so tests may call
/// this repeatedly and ignore the result.
pub fn init_telemetry(default_filter: &str) -> Result<(), Box<dyn std::error::Error>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    #[cfg(feature = "observability-json")]
    let fmt_layer = tracing_subscriber::fmt::layer().json();
    #[cfg(not(feature = "observability-json"))]
    let fmt_layer = tracing_subscriber::fmt::layer();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;

    tracing::debug!(filter = default_filter, "Tracing initialized");
    Ok(())
}
