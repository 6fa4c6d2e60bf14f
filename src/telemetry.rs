//! Structured logging setup
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter`. `RUST_LOG`
//! wins over the configured `observability.log_level`.

use std::sync::Once;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Filter used when `RUST_LOG` is not set
pub fn default_filter(level: &str) -> String {
    format!("modelpool={},tower_http=debug", level)
}

/// Initialize the global tracing subscriber
///
/// Only the first call per process has any effect.
///
/// ```no_run
/// modelpool::telemetry::init("info");
/// tracing::info!("Application started");
/// ```
pub fn init(default_level: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter(default_level)));

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}
