//! Namespaced view over an [`EventBus`]: every event name gets a `"<ns>:"` prefix.

use std::future::Future;

use keel_core::Payload;

use crate::bus::{EventBus, Subscription};
use crate::listener::{ListenerId, ListenerOptions};

#[derive(Debug, Clone)]
pub struct Namespace {
    bus: EventBus,
    name: String,
    prefix: String,
}

impl Namespace {
    pub(crate) fn new(bus: EventBus, name: &str) -> Self {
        Self {
            bus,
            name: name.to_string(),
            prefix: format!("{name}:"),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fully qualified event name, e.g. `"auth:login"`.
    pub fn qualify(&self, event: &str) -> String {
        format!("{}{}", self.prefix, event)
    }

    pub fn on<F>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(&Payload) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_with(event, ListenerOptions::default(), handler)
    }

    pub fn on_with<F>(&self, event: &str, options: ListenerOptions, handler: F) -> Subscription
    where
        F: Fn(&Payload) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.bus
            .on_with(&self.qualify(event), options.namespace(self.name.clone()), handler)
    }

    pub fn on_async<F, Fut>(&self, event: &str, options: ListenerOptions, handler: F) -> Subscription
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.bus
            .on_async(&self.qualify(event), options.namespace(self.name.clone()), handler)
    }

    pub fn once<F>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(&Payload) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_with(event, ListenerOptions::default().once(), handler)
    }

    pub fn off(&self, event: &str, listener: Option<ListenerId>) -> usize {
        self.bus.off(&self.qualify(event), listener)
    }

    pub fn emit(&self, event: &str, payload: Payload) -> usize {
        self.bus.emit(&self.qualify(event), payload)
    }

    pub async fn emit_async(&self, event: &str, payload: Payload) -> usize {
        self.bus.emit_async(&self.qualify(event), payload).await
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.bus.listener_count(&self.qualify(event))
    }

    /// Remove every listener under this namespace's prefix.
    pub fn clear(&self) -> usize {
        self.bus.clear_prefix(&self.prefix)
    }
}
