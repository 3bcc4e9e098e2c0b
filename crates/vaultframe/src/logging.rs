//! Tracing subscriber setup.
//!
//! The level comes from the client `Context`; `RUST_LOG` wins when set.
//! Installing twice is harmless: the first subscriber stays.

use crate::config::LogLevel;
use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Install the global fmt subscriber for the given level.
pub fn init(level: LogLevel) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("vaultframe={}", level.directive())));
        // Another subscriber may already be installed by the embedding app.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    });
}
