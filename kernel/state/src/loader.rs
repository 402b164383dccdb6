//! Pluggable state persistence.
//!
//! The kernel owns no storage. A [`StateLoader`] supplied by the host is
//! asked for the initial tree when the engine initialises and is handed the
//! tree on explicit saves.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use keel_core::Payload;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

/// Called by a loader when its backing store changes underneath the engine.
pub type LoaderCallback = Arc<dyn Fn(Payload) + Send + Sync>;

#[async_trait]
pub trait StateLoader: Send + Sync {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// Produce the full state tree. Must be a JSON object.
    async fn load(&self) -> Result<Payload>;

    async fn save(&self, state: &Payload) -> Result<()>;

    /// Subscribe to external changes. Loaders without a change feed keep the default.
    fn watch(&self, _callback: LoaderCallback) -> bool {
        false
    }
}

/// In-process loader, useful for tests and as a template for real adapters.
#[derive(Clone, Default)]
pub struct MemoryLoader {
    data: Arc<RwLock<Payload>>,
    watchers: Arc<RwLock<Vec<LoaderCallback>>>,
}

impl MemoryLoader {
    pub fn new(initial: Payload) -> Self {
        Self {
            data: Arc::new(RwLock::new(initial)),
            watchers: Arc::default(),
        }
    }

    pub fn contents(&self) -> Payload {
        self.data.read().clone()
    }

    /// Replace the stored tree from outside the engine and notify watchers.
    pub fn push(&self, next: Payload) {
        *self.data.write() = next.clone();
        let watchers = self.watchers.read().clone();
        for watcher in watchers {
            watcher(next.clone());
        }
    }
}

#[async_trait]
impl StateLoader for MemoryLoader {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load(&self) -> Result<Payload> {
        let data = self.data.read().clone();
        match data {
            Value::Null => Ok(Value::Object(Default::default())),
            Value::Object(_) => Ok(data),
            other => bail!("stored state is not an object: {other}"),
        }
    }

    async fn save(&self, state: &Payload) -> Result<()> {
        debug!(loader = "memory", "Saving state");
        *self.data.write() = state.clone();
        Ok(())
    }

    fn watch(&self, callback: LoaderCallback) -> bool {
        self.watchers.write().push(callback);
        true
    }
}
