//! Structured logging for the discovery client.
//!
//! Log level is taken from `RUST_LOG` and defaults to `info`. Both
//! initializers are safe to call more than once; only the first call
//! installs a subscriber.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize human-readable logging.
///
/// # Example
/// ```no_run
/// use eduvpn_core::logging;
///
/// logging::init();
/// tracing::info!("discovery client started");
/// ```
pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// Initialize JSON logging for log aggregation.
pub fn init_json() {
    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().json().with_target(true).with_thread_ids(true))
        .try_init();
}
