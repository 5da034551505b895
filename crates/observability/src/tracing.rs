//! Tracing initialization.
//!
//! One JSON subscriber for the whole process, filtered through `RUST_LOG`.

use tracing_subscriber::EnvFilter;

/// Install the process-wide subscriber: JSON lines with timestamps,
/// level-filtered via `RUST_LOG` (default `info`).
///
/// Calling this more than once is harmless; later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

/// Human-readable variant for tests and local debugging. Writes compact
/// lines to the test writer so output stays attached to the failing test.
pub fn init_for_tests() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .with_test_writer()
        .try_init();
}
