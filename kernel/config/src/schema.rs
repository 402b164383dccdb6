//! Engine configuration schema.
//!
//! Every field has a default, so an empty document (or no file at all)
//! yields a working configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::defaults;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Used as the engine's span name in logs.
    #[serde(default = "defaults::engine_name")]
    pub name: String,

    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub events: EventBusConfig,

    #[serde(default)]
    pub state: StateConfig,

    #[serde(default)]
    pub plugins: PluginsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: defaults::engine_name(),
            debug: false,
            events: EventBusConfig::default(),
            state: StateConfig::default(),
            plugins: PluginsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBusConfig {
    #[serde(default = "defaults::max_listeners")]
    pub max_listeners: usize,

    #[serde(default = "defaults::stats_retention_secs")]
    pub stats_retention_secs: u64,

    /// `0` disables background pruning.
    #[serde(default = "defaults::maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
}

impl EventBusConfig {
    pub fn stats_retention(&self) -> Duration {
        Duration::from_secs(self.stats_retention_secs)
    }

    pub fn maintenance_interval(&self) -> Option<Duration> {
        (self.maintenance_interval_secs > 0).then(|| Duration::from_secs(self.maintenance_interval_secs))
    }
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            max_listeners: defaults::max_listeners(),
            stats_retention_secs: defaults::stats_retention_secs(),
            maintenance_interval_secs: defaults::maintenance_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateConfig {
    /// Tree the store starts with, before any loader runs.
    #[serde(default = "defaults::empty_object")]
    pub initial: Value,

    /// Report every applied change as `state:changed`.
    #[serde(default = "defaults::yes")]
    pub emit_changes: bool,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            initial: defaults::empty_object(),
            emit_changes: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginsConfig {
    /// Plugin names to skip at registration.
    #[serde(default)]
    pub disabled: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    #[serde(default = "defaults::log_level")]
    pub level: String,

    /// JSON lines on the console instead of the pretty format.
    #[serde(default)]
    pub json: bool,

    /// Directory for daily-rolling JSON log files. No file output when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
            json: false,
            dir: None,
        }
    }
}
