//! Lifecycle hook registry.
//!
//! Handlers run sequentially for one trigger, highest priority first and in
//! registration order within a priority. A failing handler is logged and
//! skipped; the returned [`TriggerReport`] says which ones failed.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use keel_core::{KernelError, KernelResult, Payload};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::hook::LifecycleHook;

type HookFn = Arc<dyn Fn(Payload) -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

struct Entry {
    id: HookId,
    priority: i32,
    once: bool,
    handler: HookFn,
}

#[derive(Default)]
struct Registry {
    hooks: HashMap<LifecycleHook, Vec<Entry>>,
    next_id: u64,
}

#[derive(Debug, Clone)]
pub struct HookFailure {
    pub id: HookId,
    pub message: String,
}

/// Outcome of one `trigger` call.
#[derive(Debug, Clone)]
pub struct TriggerReport {
    pub hook: LifecycleHook,
    pub invoked: usize,
    pub failures: Vec<HookFailure>,
}

impl TriggerReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// Collapse partial failure into an error for callers that want `?`.
    pub fn into_result(self) -> KernelResult<()> {
        if self.failures.is_empty() {
            return Ok(());
        }
        let messages: Vec<&str> = self.failures.iter().map(|f| f.message.as_str()).collect();
        Err(KernelError::Other(anyhow!(
            "{} of {} '{}' handlers failed: {}",
            self.failures.len(),
            self.invoked,
            self.hook,
            messages.join("; ")
        )))
    }
}

#[derive(Clone, Default)]
pub struct LifecycleManager {
    inner: Arc<RwLock<Registry>>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F, Fut>(&self, hook: impl Into<LifecycleHook>, handler: F) -> HookHandle
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register(hook.into(), 0, false, handler)
    }

    pub fn on_with_priority<F, Fut>(
        &self,
        hook: impl Into<LifecycleHook>,
        priority: i32,
        handler: F,
    ) -> HookHandle
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register(hook.into(), priority, false, handler)
    }

    /// Run on the next trigger of `hook` only.
    pub fn once<F, Fut>(&self, hook: impl Into<LifecycleHook>, handler: F) -> HookHandle
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register(hook.into(), 0, true, handler)
    }

    fn register<F, Fut>(&self, hook: LifecycleHook, priority: i32, once: bool, handler: F) -> HookHandle
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler: HookFn = Arc::new(move |args| handler(args).boxed());
        let mut registry = self.inner.write();
        registry.next_id += 1;
        let id = HookId(registry.next_id);
        let entries = registry.hooks.entry(hook.clone()).or_default();
        // Keep each list sorted: priority descending, then registration order.
        let at = entries.partition_point(|e| e.priority >= priority);
        entries.insert(
            at,
            Entry {
                id,
                priority,
                once,
                handler,
            },
        );
        debug!(hook = %hook, priority, "Lifecycle handler registered");
        HookHandle {
            registry: Arc::downgrade(&self.inner),
            hook,
            id,
        }
    }

    pub fn off(&self, hook: &LifecycleHook, id: HookId) -> bool {
        remove(&self.inner, hook, id)
    }

    pub fn handler_count(&self, hook: &LifecycleHook) -> usize {
        self.inner.read().hooks.get(hook).map_or(0, Vec::len)
    }

    pub fn clear(&self, hook: &LifecycleHook) -> usize {
        self.inner.write().hooks.remove(hook).map_or(0, |v| v.len())
    }

    pub fn clear_all(&self) {
        self.inner.write().hooks.clear();
    }

    /// Run every handler for `hook` in order, awaiting each.
    pub async fn trigger(&self, hook: impl Into<LifecycleHook>, args: Payload) -> TriggerReport {
        let hook = hook.into();
        let handlers: Vec<(HookId, HookFn)> = {
            let mut registry = self.inner.write();
            match registry.hooks.get_mut(&hook) {
                Some(entries) => {
                    let snapshot = entries
                        .iter()
                        .map(|e| (e.id, Arc::clone(&e.handler)))
                        .collect();
                    entries.retain(|e| !e.once);
                    snapshot
                }
                None => Vec::new(),
            }
        };

        let mut report = TriggerReport {
            hook: hook.clone(),
            invoked: handlers.len(),
            failures: Vec::new(),
        };
        for (id, handler) in handlers {
            let outcome = AssertUnwindSafe(handler(args.clone())).catch_unwind().await;
            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => format!("{e:#}"),
                Err(_) => "handler panicked".to_string(),
            };
            warn!(hook = %hook, error = %message, "Lifecycle handler failed");
            report.failures.push(HookFailure { id, message });
        }
        debug!(hook = %hook, invoked = report.invoked, failed = report.failures.len(), "Lifecycle hook triggered");
        report
    }
}

fn remove(registry: &RwLock<Registry>, hook: &LifecycleHook, id: HookId) -> bool {
    let mut registry = registry.write();
    let Some(entries) = registry.hooks.get_mut(hook) else {
        return false;
    };
    let before = entries.len();
    entries.retain(|e| e.id != id);
    let removed = entries.len() != before;
    if entries.is_empty() {
        registry.hooks.remove(hook);
    }
    removed
}

/// Unregisters its handler on `unsubscribe`.
#[derive(Clone)]
pub struct HookHandle {
    registry: Weak<RwLock<Registry>>,
    hook: LifecycleHook,
    id: HookId,
}

impl HookHandle {
    pub fn id(&self) -> HookId {
        self.id
    }

    pub fn hook(&self) -> &LifecycleHook {
        &self.hook
    }

    pub fn unsubscribe(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| remove(&registry, &self.hook, self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn push(
        log: &Arc<Mutex<Vec<String>>>,
        label: &'static str,
    ) -> impl Fn(Payload) -> futures::future::Ready<Result<()>> + use<> {
        let log = Arc::clone(log);
        move |_| {
            log.lock().push(label.to_string());
            futures::future::ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn handlers_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let lifecycle = LifecycleManager::new();
        lifecycle.on(LifecycleHook::Mounted, push(&log, "a"));
        lifecycle.on("mounted", push(&log, "b"));
        lifecycle.on(LifecycleHook::Unmounted, push(&log, "other"));

        let report = lifecycle.trigger(LifecycleHook::Mounted, json!(null)).await;
        assert!(report.is_ok());
        assert_eq!(report.invoked, 2);
        assert_eq!(*log.lock(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn priority_overrides_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let lifecycle = LifecycleManager::new();
        lifecycle.on("boot", push(&log, "default"));
        lifecycle.on_with_priority("boot", 10, push(&log, "first"));
        lifecycle.on_with_priority("boot", -1, push(&log, "last"));
        lifecycle.on("boot", push(&log, "default-2"));

        lifecycle.trigger("boot", json!(null)).await;
        assert_eq!(*log.lock(), vec!["first", "default", "default-2", "last"]);
    }

    #[tokio::test]
    async fn failures_are_isolated_and_reported() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let lifecycle = LifecycleManager::new();
        lifecycle.on("init", push(&log, "before"));
        let failing = lifecycle.on("init", |_| async { anyhow::bail!("boom") });
        lifecycle.on("init", |_| async { panic!("kaboom") });
        lifecycle.on("init", push(&log, "after"));

        let report = lifecycle.trigger("init", json!({})).await;
        assert_eq!(*log.lock(), vec!["before", "after"]);
        assert_eq!(report.invoked, 4);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].id, failing.id());
        assert_eq!(report.failures[0].message, "boom");

        let err = report.into_result().unwrap_err();
        assert!(err.to_string().contains("2 of 4 'init' handlers failed"));
    }

    #[tokio::test]
    async fn handlers_receive_args() {
        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        let lifecycle = LifecycleManager::new();
        lifecycle.on(LifecycleHook::Error, move |args| {
            *s.lock() = Some(args);
            async { Ok(()) }
        });
        lifecycle
            .trigger(LifecycleHook::Error, json!({"message": "bad"}))
            .await;
        assert_eq!(*seen.lock(), Some(json!({"message": "bad"})));
    }

    #[tokio::test]
    async fn once_and_unsubscribe() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let lifecycle = LifecycleManager::new();
        lifecycle.once("ready", push(&log, "once"));
        let handle = lifecycle.on("ready", push(&log, "always"));

        lifecycle.trigger("ready", json!(null)).await;
        assert_eq!(lifecycle.handler_count(&"ready".into()), 1);
        assert!(handle.unsubscribe());
        assert!(!handle.unsubscribe());
        let report = lifecycle.trigger("ready", json!(null)).await;
        assert_eq!(report.invoked, 0);
        assert_eq!(*log.lock(), vec!["once", "always"]);
    }

    #[tokio::test]
    async fn clear_drops_one_hook() {
        let lifecycle = LifecycleManager::new();
        lifecycle.on("a", |_| async { Ok(()) });
        lifecycle.on("a", |_| async { Ok(()) });
        lifecycle.on("b", |_| async { Ok(()) });
        assert_eq!(lifecycle.clear(&"a".into()), 2);
        assert_eq!(lifecycle.handler_count(&"b".into()), 1);
        lifecycle.clear_all();
        assert_eq!(lifecycle.handler_count(&"b".into()), 0);
    }
}
