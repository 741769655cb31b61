//! Subscriber setup for binaries and tests

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global `fmt` subscriber
///
/// `RUST_LOG` takes precedence over `default_filter` (e.g. `"relayd=debug,info"`).
/// Returns false if a global subscriber was already installed.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}

/// Like [`init_tracing`], writing through the test harness capture
pub fn init_test_tracing() -> bool {
    tracing_subscriber::registry()
        .with(EnvFilter::new("relayd=debug,relayd_queue=debug,relayd_resilience=debug"))
        .with(fmt::layer().with_test_writer())
        .try_init()
        .is_ok()
}
