//! Structured logging.
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level so operators can raise
//!   verbosity without editing the config file
//! - Initialization is idempotent; later calls are ignored

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

pub const DEFAULT_FILTER: &str = "scanwire=info,tower_http=info";

/// Build the filter from the environment, falling back to `level`.
pub fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber.
pub fn init(config: &ObservabilityConfig) {
    let result = tracing_subscriber::registry()
        .with(filter(&config.log_level))
        .with(tracing_subscriber::fmt::layer().compact())
        .try_init();
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
