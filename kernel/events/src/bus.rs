//! Event Bus
//!
//! Priority-ordered publish/subscribe. Listeners for one event run
//! highest-priority first, ties in registration order. The sorted listener
//! list is cached per event and rebuilt only after that event's listeners
//! change, so a burst of emits pays for one sort.
//!
//! Handler failures (errors and panics) are caught per handler, logged and
//! counted; `emit` itself never fails because of them.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use keel_core::{KernelError, Payload};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::listener::{Handler, Listener, ListenerId, ListenerOptions, ListenerPool};
use crate::namespace::Namespace;
use crate::rate::{DebouncedEvent, ThrottledEvent};
use crate::stats::{EventStats, StatsTable};

/// Default listener ceiling per event before a warning is logged.
pub const DEFAULT_MAX_LISTENERS: usize = 50;

/// Default retention window for per-event statistics.
pub const DEFAULT_STATS_RETENTION: Duration = Duration::from_secs(300);

/// Tuning knobs for an [`EventBus`].
#[derive(Debug, Clone)]
pub struct BusOptions {
    /// Warn (never fail) once an event has more listeners than this.
    pub max_listeners: usize,
    /// Statistics for events not emitted within this window are pruned.
    pub stats_retention: Duration,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self {
            max_listeners: DEFAULT_MAX_LISTENERS,
            stats_retention: DEFAULT_STATS_RETENTION,
        }
    }
}

type Snapshot = Arc<[Arc<Listener>]>;

#[derive(Default)]
struct EventEntry {
    ids: Vec<ListenerId>,
    sorted: Option<Snapshot>,
    over_limit: bool,
}

struct BusInner {
    pool: ListenerPool,
    events: HashMap<String, EventEntry>,
    next_seq: u64,
    max_listeners: usize,
    /// Times any event crossed the listener ceiling.
    ceiling_warnings: u64,
}

impl BusInner {
    fn remove(&mut self, id: ListenerId) -> bool {
        let Some(listener) = self.pool.remove(id) else {
            return false;
        };
        if let Some(entry) = self.events.get_mut(&listener.event) {
            entry.ids.retain(|existing| *existing != id);
            entry.sorted = None;
            if entry.ids.len() <= self.max_listeners {
                entry.over_limit = false;
            }
            if entry.ids.is_empty() {
                self.events.remove(&listener.event);
            }
        }
        true
    }

    fn remove_event(&mut self, event: &str) -> usize {
        let Some(entry) = self.events.remove(event) else {
            return 0;
        };
        for id in &entry.ids {
            self.pool.remove(*id);
        }
        entry.ids.len()
    }

    fn snapshot(&mut self, event: &str) -> Option<Snapshot> {
        let entry = self.events.get_mut(event)?;
        if let Some(sorted) = &entry.sorted {
            return Some(Arc::clone(sorted));
        }
        let mut listeners: Vec<Arc<Listener>> = entry
            .ids
            .iter()
            .filter_map(|id| self.pool.get(*id).cloned())
            .collect();
        listeners.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        let sorted: Snapshot = listeners.into();
        entry.sorted = Some(Arc::clone(&sorted));
        Some(sorted)
    }
}

/// Cloneable handle to a shared event bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
    stats: Arc<Mutex<StatsTable>>,
    options: BusOptions,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_options(BusOptions::default())
    }

    pub fn with_options(options: BusOptions) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                pool: ListenerPool::default(),
                events: HashMap::new(),
                next_seq: 0,
                max_listeners: options.max_listeners,
                ceiling_warnings: 0,
            })),
            stats: Arc::new(Mutex::new(StatsTable::new(options.stats_retention))),
            options,
        }
    }

    pub fn options(&self) -> &BusOptions {
        &self.options
    }

    /// Subscribe with default options.
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
        self.register(event, options, Handler::Sync(Arc::new(handler)))
    }

    /// Subscribe an async handler. `emit_async` awaits it in priority order;
    /// a plain `emit` spawns it onto the current runtime.
    pub fn on_async<F, Fut>(&self, event: &str, options: ListenerOptions, handler: F) -> Subscription
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler = Arc::new(move |payload: Payload| handler(payload).boxed());
        self.register(event, options, Handler::Async(handler))
    }

    pub fn once_async<F, Fut>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_async(event, ListenerOptions::default().once(), handler)
    }

    pub fn once<F>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(&Payload) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_with(event, ListenerOptions::default().once(), handler)
    }

    pub fn once_with_priority<F>(&self, event: &str, priority: i32, handler: F) -> Subscription
    where
        F: Fn(&Payload) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_with(
            event,
            ListenerOptions::default().once().priority(priority),
            handler,
        )
    }

    fn register(&self, event: &str, options: ListenerOptions, handler: Handler) -> Subscription {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let id = inner.pool.insert(|id| Listener {
            id,
            event: event.to_string(),
            handler,
            once: options.once,
            priority: options.priority,
            namespace: options.namespace.clone(),
            seq,
        });
        let entry = inner.events.entry(event.to_string()).or_default();
        entry.ids.push(id);
        entry.sorted = None;

        let count = entry.ids.len();
        if count > self.options.max_listeners {
            if !entry.over_limit {
                entry.over_limit = true;
                inner.ceiling_warnings += 1;
                warn!(
                    event = %event,
                    count,
                    max = self.options.max_listeners,
                    "Listener count exceeds ceiling; possible leak"
                );
            }
        } else {
            entry.over_limit = false;
        }
        debug!(event = %event, priority = options.priority, once = options.once, "Listener registered");

        Subscription {
            bus: Arc::downgrade(&self.inner),
            id,
            event: event.to_string(),
        }
    }

    /// Remove one listener of `event`, or all of them when `listener` is `None`.
    pub fn off(&self, event: &str, listener: Option<ListenerId>) -> usize {
        let mut inner = self.inner.lock();
        match listener {
            None => inner.remove_event(event),
            Some(id) => {
                let belongs = inner.pool.get(id).is_some_and(|l| l.event == event);
                usize::from(belongs && inner.remove(id))
            }
        }
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.lock().remove(id)
    }

    /// Remove every listener whose event name starts with `prefix`.
    pub fn clear_prefix(&self, prefix: &str) -> usize {
        let mut inner = self.inner.lock();
        let events: Vec<String> = inner
            .events
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect();
        events.iter().map(|event| inner.remove_event(event)).sum()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let events: Vec<String> = inner.events.keys().cloned().collect();
        for event in events {
            inner.remove_event(&event);
        }
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.inner
            .lock()
            .events
            .get(event)
            .map(|entry| entry.ids.len())
            .unwrap_or(0)
    }

    pub fn has_listeners(&self, event: &str) -> bool {
        self.listener_count(event) > 0
    }

    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().events.keys().cloned().collect();
        names.sort();
        names
    }

    /// Listeners registered through a namespace handle (or with an explicit namespace).
    pub fn namespace_listener_count(&self, namespace: &str) -> usize {
        let inner = self.inner.lock();
        inner
            .events
            .values()
            .flat_map(|entry| entry.ids.iter())
            .filter_map(|id| inner.pool.get(*id))
            .filter(|l| l.namespace.as_deref() == Some(namespace))
            .count()
    }

    /// Whether `event` currently has more listeners than the ceiling.
    pub fn is_over_ceiling(&self, event: &str) -> bool {
        self.inner
            .lock()
            .events
            .get(event)
            .is_some_and(|entry| entry.over_limit)
    }

    /// How many times an event crossed the listener ceiling. Each crossing warns once.
    pub fn ceiling_warnings(&self) -> u64 {
        self.inner.lock().ceiling_warnings
    }

    pub fn stats(&self, event: &str) -> Option<EventStats> {
        self.stats.lock().get(event)
    }

    /// Drop statistics older than the retention window.
    pub fn prune_stats(&self) -> usize {
        let pruned = self.stats.lock().prune();
        if pruned > 0 {
            debug!(pruned, "Pruned stale event statistics");
        }
        pruned
    }

    /// Prune statistics every `every` on the current runtime. `None` without a runtime.
    pub fn spawn_maintenance(&self, every: Duration) -> Option<MaintenanceHandle> {
        let handle = Handle::try_current().ok()?;
        let stats: Weak<Mutex<StatsTable>> = Arc::downgrade(&self.stats);
        let task = handle.spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(stats) = stats.upgrade() else { break };
                let pruned = stats.lock().prune();
                if pruned > 0 {
                    debug!(pruned, "Pruned stale event statistics");
                }
            }
        });
        Some(MaintenanceHandle { task })
    }

    /// Dispatch `payload` to every listener of `event`. Returns how many handlers ran.
    pub fn emit(&self, event: &str, payload: Payload) -> usize {
        let Some(listeners) = self.begin_emit(event) else {
            return 0;
        };
        let mut invoked = 0;
        for listener in listeners.iter() {
            if !self.claim(listener) {
                continue;
            }
            invoked += 1;
            match &listener.handler {
                Handler::Sync(handler) => self.run_sync(event, handler.as_ref(), &payload),
                Handler::Async(handler) => {
                    let Ok(runtime) = Handle::try_current() else {
                        self.report(event, "async listener skipped: no runtime for sync emit");
                        continue;
                    };
                    let future = AssertUnwindSafe(handler(payload.clone())).catch_unwind();
                    let bus = self.clone();
                    let event = event.to_string();
                    runtime.spawn(async move {
                        match future.await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => bus.report(&event, &format!("{e:#}")),
                            Err(panic) => bus.report(&event, &panic_message(panic)),
                        }
                    });
                }
            }
        }
        invoked
    }

    /// Like [`emit`](Self::emit), awaiting async handlers one after another.
    pub async fn emit_async(&self, event: &str, payload: Payload) -> usize {
        let Some(listeners) = self.begin_emit(event) else {
            return 0;
        };
        let mut invoked = 0;
        for listener in listeners.iter() {
            if !self.claim(listener) {
                continue;
            }
            invoked += 1;
            match &listener.handler {
                Handler::Sync(handler) => self.run_sync(event, handler.as_ref(), &payload),
                Handler::Async(handler) => {
                    let future = AssertUnwindSafe(handler(payload.clone())).catch_unwind();
                    match future.await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => self.report(event, &format!("{e:#}")),
                        Err(panic) => self.report(event, &panic_message(panic)),
                    }
                }
            }
        }
        invoked
    }

    fn begin_emit(&self, event: &str) -> Option<Snapshot> {
        self.stats.lock().record_emit(event);
        self.inner.lock().snapshot(event)
    }

    /// `once` listeners are removed before they run, so a re-entrant emit
    /// cannot fire them twice.
    fn claim(&self, listener: &Listener) -> bool {
        !listener.once || self.inner.lock().remove(listener.id)
    }

    fn run_sync(
        &self,
        event: &str,
        handler: &(dyn Fn(&Payload) -> anyhow::Result<()> + Send + Sync),
        payload: &Payload,
    ) {
        match std::panic::catch_unwind(AssertUnwindSafe(|| handler(payload))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.report(event, &format!("{e:#}")),
            Err(panic) => self.report(event, &panic_message(panic)),
        }
    }

    fn report(&self, event: &str, message: &str) {
        let err = KernelError::ListenerError {
            event: event.to_string(),
            message: message.to_string(),
        };
        warn!(event = %event, error = %err, "Event listener failed");
        self.stats.lock().record_error(event);
    }

    pub fn namespace(&self, namespace: &str) -> Namespace {
        Namespace::new(self.clone(), namespace)
    }

    /// Coalesce bursts of emits into one emission after `delay` of silence.
    pub fn debounce(&self, event: &str, delay: Duration) -> DebouncedEvent {
        DebouncedEvent::new(self.clone(), event, delay)
    }

    /// Emit at most once per `interval`, with a trailing emit of the latest payload.
    pub fn throttle(&self, event: &str, interval: Duration) -> ThrottledEvent {
        ThrottledEvent::new(self.clone(), event, interval)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("EventBus")
            .field("events", &inner.events.len())
            .field("listeners", &inner.pool.len())
            .field("pooled_slots", &inner.pool.capacity())
            .field("free_slots", &inner.pool.free_slots())
            .field("tracked_events", &self.stats.lock().len())
            .field("options", &self.options)
            .finish()
    }
}

/// Returned by every `on*` call; removes the listener when asked.
#[derive(Debug, Clone)]
pub struct Subscription {
    bus: Weak<Mutex<BusInner>>,
    id: ListenerId,
    event: String,
}

impl Subscription {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    /// Remove the listener. Returns `false` if it was already gone.
    pub fn unsubscribe(&self) -> bool {
        match self.bus.upgrade() {
            Some(inner) => inner.lock().remove(self.id),
            None => false,
        }
    }
}

/// Background statistics pruning; stops when dropped.
#[derive(Debug)]
pub struct MaintenanceHandle {
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    pub fn stop(self) {}
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
