//! Tracing bootstrap. Call once at process start; repeated calls are no-ops
//! so test binaries can initialize freely.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber with an env-filter
/// (`RUST_LOG`, defaulting to `info`).
pub fn init_telemetry() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // try_init: a second caller (another test in the same binary) loses the
    // race and that is fine.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
