//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files and
//! default every field, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};

/// Root configuration for the service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ScanwireConfig {
    /// Which API families to serve.
    pub mode: Mode,

    /// Listener configuration.
    pub listener: ListenerConfig,

    /// Indexer API settings.
    pub indexer: IndexerConfig,

    /// Matcher API settings.
    pub matcher: MatcherConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Request limits.
    pub security: SecurityConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// The API families a process serves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Indexer, matcher and notifier together.
    #[default]
    Combo,
    Indexer,
    Matcher,
    Notifier,
}

impl Mode {
    pub fn serves_indexer(self) -> bool {
        matches!(self, Mode::Combo | Mode::Indexer)
    }

    pub fn serves_matcher(self) -> bool {
        matches!(self, Mode::Combo | Mode::Matcher)
    }

    pub fn serves_notifier(self) -> bool {
        matches!(self, Mode::Combo | Mode::Notifier)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Mode::Combo => "combo",
            Mode::Indexer => "indexer",
            Mode::Matcher => "matcher",
            Mode::Notifier => "notifier",
        })
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:6060").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:6060".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Concurrent index-report submissions admitted; 0 is unlimited.
    pub index_report_request_concurrency: u32,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            index_report_request_concurrency: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// `max-age` advertised on vulnerability reports.
    pub cache_age_secs: u64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            cache_age_secs: 3600,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,

    /// How long in-flight requests may drain after a shutdown signal.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 60,
            shutdown_grace_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum accepted request body, in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 10 * 1024 * 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub log_level: String,

    /// Serve Prometheus metrics.
    pub metrics_enabled: bool,

    /// Bind address of the metrics listener.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: crate::observability::logging::DEFAULT_FILTER.to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
