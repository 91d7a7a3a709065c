//! Structured logging setup.
//!
//! Modernized from `engine/src/logging.rs`'s legacy `slog` setup onto `tracing` +
//! `tracing-subscriber`, matching the dependency the engine itself had already moved to.

use tracing_subscriber::{fmt, EnvFilter};

pub const COMPONENT_KEY: &str = "component";

/// Initializes the global tracing subscriber. `json` selects the structured JSON
/// formatter (for non-interactive deployments); otherwise a human-readable formatter
/// is used. `default_level` seeds `RUST_LOG`/`EXPLORER_LOG_LEVEL` when neither is set.
pub fn init(default_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    let subscriber = fmt().with_env_filter(filter).with_target(true);

    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

#[cfg(test)]
pub fn init_test_logger() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
