//! `keel-plugins`: plugin registration, dependency resolution and install/uninstall.

pub mod manager;
pub mod plugin;
pub mod resolver;

pub use manager::PluginManager;
pub use plugin::{Plugin, PluginContext, PluginInfo, PluginServices, PluginState};
pub use resolver::{dependents_of, DependencyGraph};
