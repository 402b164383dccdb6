//! `keel-events`: the kernel event bus.
//!
//! - [`EventBus`]: priority pub/sub with cached sort order and per-handler fault isolation
//! - [`Namespace`]: `"ns:"`-prefixed view with bulk `clear()`
//! - [`Debouncer`] / [`Throttler`]: rate-shaping wrappers for buses or any callable

pub mod bus;
pub mod listener;
pub mod namespace;
pub mod rate;
pub mod stats;

pub use bus::{BusOptions, EventBus, MaintenanceHandle, Subscription, DEFAULT_MAX_LISTENERS};
pub use listener::{ListenerId, ListenerOptions};
pub use namespace::Namespace;
pub use rate::{DebouncedEvent, Debouncer, ThrottledEvent, Throttler};
pub use stats::EventStats;

/// Event names the kernel itself emits.
pub mod names {
    pub const STATE_CHANGED: &str = "state:changed";
    pub const STATE_CLEARED: &str = "state:cleared";
    pub const PLUGIN_REGISTERED: &str = "plugin:registered";
    pub const PLUGIN_INSTALLED: &str = "plugin:installed";
    pub const PLUGIN_UNINSTALLED: &str = "plugin:uninstalled";
    pub const PLUGIN_ERROR: &str = "plugin:error";
    pub const ENGINE_READY: &str = "engine:ready";
    pub const ENGINE_MOUNTED: &str = "engine:mounted";
    pub const ENGINE_UNMOUNTED: &str = "engine:unmounted";
    pub const ENGINE_DESTROYED: &str = "engine:destroyed";
    pub const ENGINE_ERROR: &str = "engine:error";
}
