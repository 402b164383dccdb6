//! The state store.
//!
//! A single nested JSON tree addressed by dot-paths. Writes are applied to
//! the tree immediately; watcher notifications are either delivered at once
//! or, inside `batch`/`transaction`, deferred and coalesced to one
//! notification per distinct path carrying the value as of the batch end.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use keel_core::{DotPath, KernelError, KernelResult, PathPattern, Payload};
use keel_events::{names, EventBus};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::tree::{self, differs};
use crate::watch::{Callback, Watchers, WatcherId};

/// One applied change, as carried by `state:changed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    pub path: String,
    pub value: Payload,
    pub old_value: Payload,
}

impl StateChange {
    /// Decode a `state:changed` payload.
    pub fn from_event(payload: &Payload) -> Option<Self> {
        serde_json::from_value(payload.clone()).ok()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransactionOptions {
    /// Extra attempts after the first failure. The tree is restored before each retry.
    pub retries: u32,
    pub retry_delay: Duration,
}

impl TransactionOptions {
    pub fn retries(retries: u32) -> Self {
        Self {
            retries,
            ..Default::default()
        }
    }
}

/// Deferred changes: first-seen old value per path, in first-change order.
#[derive(Debug, Clone, Default)]
struct Pending {
    order: Vec<(DotPath, Option<Payload>)>,
    index: HashMap<DotPath, usize>,
}

impl Pending {
    fn record(&mut self, path: DotPath, old: Option<Payload>) {
        if self.index.contains_key(&path) {
            return;
        }
        self.index.insert(path.clone(), self.order.len());
        self.order.push((path, old));
    }

    fn take(&mut self) -> Vec<(DotPath, Option<Payload>)> {
        self.index.clear();
        std::mem::take(&mut self.order)
    }
}

#[derive(Default)]
struct BatchState {
    depth: usize,
    pending: Pending,
}

struct StoreInner {
    tree: RwLock<Value>,
    watchers: RwLock<Watchers>,
    batch: Mutex<BatchState>,
    events: Option<EventBus>,
}

/// Cloneable handle to a shared state tree.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<StoreInner>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A store that reports every applied change as `state:changed` on `bus`.
    pub fn with_events(bus: EventBus) -> Self {
        Self::build(Some(bus))
    }

    fn build(events: Option<EventBus>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                tree: RwLock::new(tree::empty_tree()),
                watchers: RwLock::new(Watchers::default()),
                batch: Mutex::new(BatchState::default()),
                events,
            }),
        }
    }

    pub fn get(&self, path: &str) -> Option<Payload> {
        let path = match DotPath::parse(path) {
            Ok(path) => path,
            Err(e) => {
                debug!(error = %e, "State read with invalid path");
                return None;
            }
        };
        tree::lookup(&self.inner.tree.read(), &path).cloned()
    }

    pub fn get_or(&self, path: &str, default: impl Into<Payload>) -> Payload {
        self.get(path).unwrap_or_else(|| default.into())
    }

    /// Read and deserialize; `None` if absent or of the wrong shape.
    pub fn get_as<T: DeserializeOwned>(&self, path: &str) -> Option<T> {
        self.get(path).and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn has(&self, path: &str) -> bool {
        DotPath::parse(path)
            .map(|path| tree::lookup(&self.inner.tree.read(), &path).is_some())
            .unwrap_or(false)
    }

    pub fn keys(&self) -> Vec<String> {
        match &*self.inner.tree.read() {
            Value::Object(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Deep copy of the whole tree.
    pub fn snapshot(&self) -> Payload {
        self.inner.tree.read().clone()
    }

    pub fn set(&self, path: &str, value: impl Into<Payload>) -> KernelResult<()> {
        let path = DotPath::parse(path)?;
        let value = value.into();
        let old = {
            let mut tree = self.inner.tree.write();
            if let Some(current) = tree::lookup(&tree, &path) {
                if !differs(Some(current), Some(&value)) {
                    return Ok(());
                }
            }
            tree::write(&mut tree, &path, value.clone())?
        };
        self.changed(path, old, Some(value));
        Ok(())
    }

    /// Replace the value at `path` with `f(current)`.
    pub fn update<F>(&self, path: &str, f: F) -> KernelResult<Payload>
    where
        F: FnOnce(Option<&Payload>) -> Payload,
    {
        let current = self.get(path);
        let next = f(current.as_ref());
        self.set(path, next.clone())?;
        Ok(next)
    }

    /// Shallow-merge the entries of `patch` (an object) into the object at `path`.
    pub fn merge(&self, path: &str, patch: Payload) -> KernelResult<()> {
        let base = DotPath::parse(path)?;
        let Value::Object(entries) = patch else {
            return Err(KernelError::invalid_path(path, "merge requires an object"));
        };
        self.batch(|| {
            entries
                .into_iter()
                .try_for_each(|(key, value)| self.set(&base.child(&key).to_string(), value))
        })
    }

    /// Remove the value at `path`. Parents left empty are pruned.
    pub fn delete(&self, path: &str) -> KernelResult<bool> {
        let path = DotPath::parse(path)?;
        let removed = tree::remove(&mut self.inner.tree.write(), path.segments());
        match removed {
            Some(old) => {
                self.changed(path, Some(old), None);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn clear(&self) {
        let old = std::mem::replace(&mut *self.inner.tree.write(), tree::empty_tree());
        if let Value::Object(map) = old {
            self.batch(|| {
                for (key, value) in map {
                    if let Ok(path) = DotPath::parse(&key) {
                        self.changed(path, Some(value), None);
                    }
                }
            });
        }
        if let Some(bus) = &self.inner.events {
            bus.emit(names::STATE_CLEARED, Value::Null);
        }
    }

    /// Swap in a whole new tree (e.g. from a loader). Changed top-level keys are notified.
    pub fn replace(&self, next: Payload) -> KernelResult<()> {
        let Value::Object(next_map) = next else {
            return Err(KernelError::invalid_path("<root>", "state root must be an object"));
        };
        let old = std::mem::replace(&mut *self.inner.tree.write(), Value::Object(next_map.clone()));
        let old_map = match old {
            Value::Object(map) => map,
            _ => Default::default(),
        };
        let keys: BTreeSet<&String> = old_map.keys().chain(next_map.keys()).collect();
        self.batch(|| {
            for key in keys {
                let before = old_map.get(key);
                if differs(before, next_map.get(key)) {
                    if let Ok(path) = DotPath::parse(key) {
                        self.changed(path, before.cloned(), None);
                    }
                }
            }
        });
        Ok(())
    }

    /// Watch one exact path. The callback gets `(new, old)`.
    pub fn watch<F>(&self, path: &str, callback: F) -> KernelResult<WatchHandle>
    where
        F: Fn(&Payload, &Payload) + Send + Sync + 'static,
    {
        let path = DotPath::parse(path)?;
        let id = self
            .inner
            .watchers
            .write()
            .add_exact(path.to_string(), Arc::new(callback));
        Ok(self.handle(id))
    }

    /// Watch every path matching a glob pattern. The callback gets `(path, new, old)`.
    pub fn watch_pattern<F>(&self, pattern: &str, callback: F) -> KernelResult<WatchHandle>
    where
        F: Fn(&str, &Payload, &Payload) + Send + Sync + 'static,
    {
        let pattern = PathPattern::compile(pattern)?;
        let id = self
            .inner
            .watchers
            .write()
            .add_pattern(pattern, Arc::new(callback));
        Ok(self.handle(id))
    }

    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.read().len()
    }

    pub fn clear_watchers(&self) {
        self.inner.watchers.write().clear();
    }

    fn handle(&self, id: WatcherId) -> WatchHandle {
        WatchHandle {
            store: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Run `f` with notifications deferred until it returns, one per distinct changed path.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        let guard = BatchGuard::enter(self);
        let result = f();
        guard.commit();
        result
    }

    pub fn is_batching(&self) -> bool {
        self.inner.batch.lock().depth > 0
    }

    /// Run an async body against a snapshot. If it fails (after `retries` extra
    /// attempts) the tree is restored and no notifications fire.
    pub async fn transaction<T, F, Fut>(&self, options: TransactionOptions, mut body: F) -> KernelResult<T>
    where
        F: FnMut(StateStore) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut guard = TransactionGuard::begin(self);
        let mut attempt = 0;
        loop {
            match body(self.clone()).await {
                Ok(value) => {
                    guard.commit();
                    return Ok(value);
                }
                Err(err) => {
                    guard.restore();
                    if attempt < options.retries {
                        attempt += 1;
                        warn!(attempt, retries = options.retries, error = %err, "State transaction failed; retrying");
                        if !options.retry_delay.is_zero() {
                            tokio::time::sleep(options.retry_delay).await;
                        }
                        continue;
                    }
                    guard.abort();
                    debug!(error = %err, "State transaction rolled back");
                    return Err(err.downcast::<KernelError>().unwrap_or_else(KernelError::Other));
                }
            }
        }
    }

    fn changed(&self, path: DotPath, old: Option<Payload>, new: Option<Payload>) {
        {
            let mut batch = self.inner.batch.lock();
            if batch.depth > 0 {
                batch.pending.record(path, old);
                return;
            }
        }
        self.notify(&path.to_string(), new.as_ref(), old.as_ref());
    }

    fn end_batch(&self) {
        let pending = {
            let mut batch = self.inner.batch.lock();
            batch.depth = batch.depth.saturating_sub(1);
            if batch.depth > 0 {
                return;
            }
            batch.pending.take()
        };
        for (path, old) in pending {
            let new = tree::lookup(&self.inner.tree.read(), &path).cloned();
            if differs(old.as_ref(), new.as_ref()) {
                self.notify(&path.to_string(), new.as_ref(), old.as_ref());
            }
        }
    }

    fn notify(&self, path: &str, new: Option<&Payload>, old: Option<&Payload>) {
        let null = Value::Null;
        let new = new.unwrap_or(&null);
        let old = old.unwrap_or(&null);
        let callbacks = self.inner.watchers.read().matching(path);
        for callback in callbacks {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| match &callback {
                Callback::Exact(f) => f(new, old),
                Callback::Pattern(f) => f(path, new, old),
            }));
            if outcome.is_err() {
                warn!(path = %path, "State watcher panicked");
            }
        }
        if let Some(bus) = &self.inner.events {
            let change = StateChange {
                path: path.to_string(),
                value: new.clone(),
                old_value: old.clone(),
            };
            bus.emit(names::STATE_CHANGED, json!(change));
        }
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("keys", &self.keys())
            .field("watchers", &self.watcher_count())
            .field("batching", &self.is_batching())
            .finish()
    }
}

/// Removes a watcher when asked.
#[derive(Debug, Clone)]
pub struct WatchHandle {
    store: Weak<StoreInner>,
    id: WatcherId,
}

impl WatchHandle {
    pub fn id(&self) -> WatcherId {
        self.id
    }

    pub fn unwatch(&self) -> bool {
        match self.store.upgrade() {
            Some(inner) => inner.watchers.write().remove(self.id),
            None => false,
        }
    }
}

struct BatchGuard<'a> {
    store: &'a StateStore,
    finished: bool,
}

impl<'a> BatchGuard<'a> {
    fn enter(store: &'a StateStore) -> Self {
        store.inner.batch.lock().depth += 1;
        Self {
            store,
            finished: false,
        }
    }

    fn commit(mut self) {
        self.finished = true;
        self.store.end_batch();
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Unwinding out of the batch body: close it without notifying.
        let mut batch = self.store.inner.batch.lock();
        batch.depth = batch.depth.saturating_sub(1);
        if batch.depth == 0 {
            batch.pending = Pending::default();
        }
    }
}

struct TransactionGuard<'a> {
    store: &'a StateStore,
    snapshot: Value,
    saved: Pending,
    open: bool,
}

impl<'a> TransactionGuard<'a> {
    fn begin(store: &'a StateStore) -> Self {
        let snapshot = store.inner.tree.read().clone();
        let saved = {
            let mut batch = store.inner.batch.lock();
            batch.depth += 1;
            batch.pending.clone()
        };
        Self {
            store,
            snapshot,
            saved,
            open: true,
        }
    }

    fn restore(&self) {
        *self.store.inner.tree.write() = self.snapshot.clone();
        self.store.inner.batch.lock().pending = self.saved.clone();
    }

    fn commit(&mut self) {
        self.open = false;
        self.store.end_batch();
    }

    fn abort(&mut self) {
        self.open = false;
        self.restore();
        let mut batch = self.store.inner.batch.lock();
        batch.depth = batch.depth.saturating_sub(1);
    }
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        // Body future dropped mid-flight: treat as a failed transaction.
        if self.open {
            self.abort();
        }
    }
}
