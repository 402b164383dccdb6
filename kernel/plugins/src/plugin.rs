//! The plugin contract and the context a plugin is installed with.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel_core::Extensions;
use keel_events::EventBus;
use keel_lifecycle::LifecycleManager;
use keel_middleware::MiddlewarePipeline;
use keel_state::StateStore;
use serde::{Deserialize, Serialize};
use tracing::Span;

/// A unit of functionality installed into the kernel.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique name. A second plugin with the same name is rejected.
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "0.0.0"
    }

    /// Names of plugins that must be installed first.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    async fn install(&self, ctx: &PluginContext) -> Result<()>;

    async fn uninstall(&self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }
}

/// Current state of a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    Registered,
    Resolving,
    Installed,
    Uninstalling,
    Removed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub dependencies: Vec<String>,
    pub state: PluginState,
    pub registered_at: DateTime<Utc>,
    pub installed_at: Option<DateTime<Utc>>,
    /// Last install or uninstall failure.
    pub error: Option<String>,
}

/// Kernel components shared by every plugin.
#[derive(Clone, Default)]
pub struct PluginServices {
    pub state: StateStore,
    pub events: EventBus,
    pub middleware: MiddlewarePipeline,
    pub lifecycle: LifecycleManager,
    pub extensions: Extensions,
}

/// What a plugin's `install`/`uninstall` may touch.
#[derive(Clone)]
pub struct PluginContext {
    pub plugin: String,
    pub version: String,
    pub state: StateStore,
    pub events: EventBus,
    pub middleware: MiddlewarePipeline,
    pub lifecycle: LifecycleManager,
    pub extensions: Extensions,
    span: Span,
}

impl PluginContext {
    pub fn new(services: &PluginServices, plugin: &str, version: &str) -> Self {
        Self {
            plugin: plugin.to_string(),
            version: version.to_string(),
            state: services.state.clone(),
            events: services.events.clone(),
            middleware: services.middleware.clone(),
            lifecycle: services.lifecycle.clone(),
            extensions: services.extensions.clone(),
            span: tracing::info_span!("plugin", name = %plugin, version = %version),
        }
    }

    /// The plugin's logger. Enter it (or use `tracing::Instrument`) to tag output with the plugin.
    pub fn span(&self) -> &Span {
        &self.span
    }
}
