//! Logging initialization
//!
//! - `RUST_LOG` always takes precedence
//! - otherwise the `logging.filter` value from the engine config
//! - otherwise `"info"`
//!
//! # Usage
//! ```rust,ignore
//! use iox_engine::utils::init_logging;
//!
//! init_logging(Some("iox_engine=debug"));
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Default filter when neither RUST_LOG nor config provides one
const DEFAULT_FILTER: &str = "info";

fn build_filter(filter: Option<&str>) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    EnvFilter::new(filter.unwrap_or(DEFAULT_FILTER))
}

/// Initialize human-readable logging on stderr
///
/// Returns false if a global subscriber was already installed.
pub fn init_logging(filter: Option<&str>) -> bool {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(std::env::var("NO_COLOR").is_err()),
        )
        .with(build_filter(filter))
        .try_init()
        .is_ok()
}

/// Initialize JSON logging for log aggregation systems
#[cfg(feature = "json-logging")]
pub fn init_json_logging(filter: Option<&str>) -> bool {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true)
                .with_span_list(true),
        )
        .with(build_filter(filter))
        .try_init()
        .is_ok()
}

/// Initialize logging from the engine's logging section
pub fn init_logging_from_config(config: Option<&LoggingConfig>) -> bool {
    let filter = config.and_then(|c| c.filter.as_deref());

    if config.map(|c| c.json_format).unwrap_or(false) {
        #[cfg(feature = "json-logging")]
        {
            return init_json_logging(filter);
        }
        #[cfg(not(feature = "json-logging"))]
        {
            tracing::warn!("JSON logging requested but the json-logging feature is disabled");
        }
    }
    init_logging(filter)
}
