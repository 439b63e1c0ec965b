//! Tracing subscriber setup

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{NodeError, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter from `RUST_LOG`, falling back to the configured level
pub fn env_filter(config: &LoggingConfig, verbose: bool) -> EnvFilter {
    let fallback = if verbose { "debug" } else { config.level.as_str() };
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber; fails if one is already set
pub fn init_logging(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let filter = env_filter(config, verbose);
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(config.with_target)
                    .with_thread_ids(false)
                    .with_file(false),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(config.with_target)
                    .with_current_span(true),
            )
            .try_init(),
    };
    installed.map_err(|e| NodeError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_level_falls_back() {
        let config = LoggingConfig {
            level: "not a level ===".into(),
            ..LoggingConfig::default()
        };
        // Building the filter must not panic on a malformed directive.
        let _ = env_filter(&config, false);
    }
}
