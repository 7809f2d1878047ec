//! Tracing subscriber configuration.
//!
//! Log level conventions across the stack:
//! - ERROR: unrecoverable failures, protocol violations
//! - WARN: recoverable errors, unexpected but handled conditions
//! - INFO: lifecycle events (channel opened, endpoint bound)
//! - DEBUG: protocol state changes, handshake steps
//! - TRACE: wire-level data

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber with sensible defaults.
///
/// Log level is controlled via `RUST_LOG`; defaults to `info`.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Initialize the tracing subscriber for tests.
///
/// Uses `try_init` so repeated calls across tests are harmless.
pub fn init_for_tests() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
