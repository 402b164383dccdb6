//! Config validation with path-qualified messages.

use std::collections::HashSet;

use thiserror::Error;

use crate::schema::EngineConfig;

#[derive(Debug, Error)]
#[error("config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// All errors on one line, for surfacing as a single failure.
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }
}

pub fn validate(config: &EngineConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_events(config, &mut report);
    validate_state(config, &mut report);
    validate_plugins(config, &mut report);
    validate_logging(config, &mut report);
    report
}

fn validate_events(config: &EngineConfig, report: &mut ValidationReport) {
    let events = &config.events;
    if events.max_listeners == 0 {
        report.error("events.maxListeners", "maxListeners must be >= 1");
    }
    if events.stats_retention_secs == 0 {
        report.error("events.statsRetentionSecs", "statsRetentionSecs must be >= 1");
    }
    if events.maintenance_interval_secs > 0
        && events.stats_retention_secs < events.maintenance_interval_secs
    {
        report.warn(
            "events.statsRetentionSecs",
            format!(
                "retention ({}s) is shorter than the maintenance interval ({}s); stats may outlive their window",
                events.stats_retention_secs, events.maintenance_interval_secs
            ),
        );
    }
}

fn validate_state(config: &EngineConfig, report: &mut ValidationReport) {
    if !config.state.initial.is_object() {
        report.error("state.initial", "initial state must be an object");
    }
}

fn validate_plugins(config: &EngineConfig, report: &mut ValidationReport) {
    let mut seen = HashSet::new();
    for name in &config.plugins.disabled {
        if name.trim().is_empty() {
            report.error("plugins.disabled", "plugin name cannot be empty");
        } else if !seen.insert(name.as_str()) {
            report.warn("plugins.disabled", format!("'{name}' is listed more than once"));
        }
    }
}

fn validate_logging(config: &EngineConfig, report: &mut ValidationReport) {
    const LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];
    let level = config.logging.level.trim();
    if level.is_empty() {
        report.error("logging.level", "level cannot be empty");
    } else if !level.contains(['=', ',']) && !LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
        report.error(
            "logging.level",
            format!("unknown level '{level}'; expected one of {}", LEVELS.join(", ")),
        );
    }
}
