//! Default values for every config field.

/// Listener count per event above which the bus warns.
pub const DEFAULT_MAX_LISTENERS: usize = 50;

/// How long per-event usage statistics are kept without activity.
pub const DEFAULT_STATS_RETENTION_SECS: u64 = 300;

/// How often the engine prunes stale event statistics.
pub const DEFAULT_MAINTENANCE_INTERVAL_SECS: u64 = 60;

pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const DEFAULT_ENGINE_NAME: &str = "keel";

pub(crate) fn max_listeners() -> usize {
    DEFAULT_MAX_LISTENERS
}

pub(crate) fn stats_retention_secs() -> u64 {
    DEFAULT_STATS_RETENTION_SECS
}

pub(crate) fn maintenance_interval_secs() -> u64 {
    DEFAULT_MAINTENANCE_INTERVAL_SECS
}

pub(crate) fn log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

pub(crate) fn engine_name() -> String {
    DEFAULT_ENGINE_NAME.to_string()
}

pub(crate) fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

pub(crate) fn yes() -> bool {
    true
}
