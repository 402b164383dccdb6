//! Structured logger
//!
//! Console output (pretty or JSON lines) plus an optional daily-rolling
//! NDJSON file, filtered by `RUST_LOG` or the configured level.

use anyhow::{Context, Result};
use keel_config::LoggingConfig;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_FILE_PREFIX: &str = "keel.log";

/// Build the filter: `RUST_LOG` if set, otherwise the configured level.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level)
            .with_context(|| format!("invalid log level '{}'", config.level)),
    }
}

/// Install the global subscriber.
///
/// Returns `Ok(false)` if a subscriber was already installed (tests, embedding hosts).
pub fn init_logger(config: &LoggingConfig) -> Result<bool> {
    let filter = env_filter(config)?;

    let console = if config.json {
        fmt::layer().json().with_writer(std::io::stdout).boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(false)
            .with_ansi(true)
            .boxed()
    };

    let file = match &config.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
            Some(fmt::layer().json().with_writer(appender).with_ansi(false))
        }
        None => None,
    };

    Ok(tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_level_builds_a_filter() {
        let config = LoggingConfig {
            level: "keel_events=debug,warn".into(),
            ..Default::default()
        };
        assert!(env_filter(&config).is_ok());
    }

    #[test]
    fn second_init_is_reported_not_fatal() {
        let dir = std::env::temp_dir().join(format!("keel-logs-{}", std::process::id()));
        let config = LoggingConfig {
            dir: Some(dir.clone()),
            ..Default::default()
        };
        let first = init_logger(&config).unwrap();
        let second = init_logger(&config).unwrap();
        assert!(!(first && second));
        assert!(dir.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
