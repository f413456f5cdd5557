//! Structured logging setup for the `sentinel` binary.
//!
//! Library code only emits `tracing` events; installing a subscriber is left
//! to the binary (or an embedding application).

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level for this crate when `RUST_LOG` is unset
    pub level: String,
    /// Emit one JSON object per event instead of plain text
    pub json: bool,
    /// Include file and line of the event
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            include_location: false,
        }
    }
}

impl LoggingConfig {
    pub fn is_valid_level(level: &str) -> bool {
        LEVELS.contains(&level.to_ascii_lowercase().as_str())
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "assured_sentinel={},sentinel={}",
                self.level, self.level
            ))
        })
    }
}

/// Install the global subscriber writing to stderr. A second call is a no-op.
pub fn init_logging(config: &LoggingConfig) {
    let registry = tracing_subscriber::registry().with(config.filter());

    let result = if config.json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_file(config.include_location)
                    .with_line_number(config.include_location)
                    .with_target(true),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_file(config.include_location)
                    .with_line_number(config.include_location)
                    .with_target(false),
            )
            .try_init()
    };

    if let Err(err) = result {
        tracing::debug!(error = %err, "Logging already initialised");
    }
}
