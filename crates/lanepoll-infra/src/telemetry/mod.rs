//! Telemetry initialization
//!
//! Installs a global tracing subscriber. Output is human-readable by default and
//! JSON with the `observability-json` feature.

mod init_basic;

pub use init_basic::init_telemetry;
