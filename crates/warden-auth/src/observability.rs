//! Tracing initialization with a reloadable log level.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

use crate::config::LoggingConfig;

static LOG_RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Installs the global subscriber at `info` level.
pub fn init_tracing() {
    init_tracing_with_level("info");
}

/// Installs the global subscriber.
///
/// `RUST_LOG` takes precedence over `level` when it is set and parses.
/// Calling this more than once keeps the first subscriber.
pub fn init_tracing_with_level(level: &str) {
    let base_filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(level));

    let (reload_layer, handle) = reload::Layer::new(base_filter);
    let _ = LOG_RELOAD_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer())
        .try_init();
}

/// Installs the global subscriber from the logging section of the configuration.
pub fn init_from_config(config: &LoggingConfig) {
    init_tracing_with_level(&config.level);
}

/// Applies a new log level at runtime.
///
/// Returns `false` if tracing was not initialized through this module.
pub fn apply_logging_level(level: &str) -> bool {
    match LOG_RELOAD_HANDLE.get() {
        Some(handle) => handle
            .modify(|filter| *filter = EnvFilter::new(level))
            .is_ok(),
        None => false,
    }
}
