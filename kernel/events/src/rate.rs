//! Rate shaping: debounce and throttle wrappers.
//!
//! [`Debouncer`] and [`Throttler`] wrap any sink `Fn(T)`; the bus-level
//! [`DebouncedEvent`] / [`ThrottledEvent`] are the same wrappers with the
//! bus emit as their sink. Timers run on the current tokio runtime and are
//! cancelled by `destroy()` or when the wrapper is dropped.

use std::sync::Arc;
use std::time::Duration;

use keel_core::Payload;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::bus::EventBus;

type Sink<T> = Arc<dyn Fn(T) + Send + Sync>;

struct DebounceState<T> {
    pending: Option<T>,
    timer: Option<JoinHandle<()>>,
    generation: u64,
    destroyed: bool,
}

/// Delivers only the last value of a burst, once `delay` has passed without a new call.
pub struct Debouncer<T: Send + 'static> {
    state: Arc<Mutex<DebounceState<T>>>,
    sink: Sink<T>,
    delay: Duration,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new(delay: Duration, sink: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            state: Arc::new(Mutex::new(DebounceState {
                pending: None,
                timer: None,
                generation: 0,
                destroyed: false,
            })),
            sink: Arc::new(sink),
            delay,
        }
    }

    pub fn call(&self, value: T) {
        let Ok(runtime) = Handle::try_current() else {
            warn!("Debouncer used outside a runtime; delivering immediately");
            (self.sink)(value);
            return;
        };

        let mut state = self.state.lock();
        if state.destroyed {
            return;
        }
        state.pending = Some(value);
        state.generation += 1;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }

        let generation = state.generation;
        let shared = Arc::clone(&self.state);
        let sink = Arc::clone(&self.sink);
        let delay = self.delay;
        state.timer = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let value = {
                let mut state = shared.lock();
                if state.generation != generation {
                    return;
                }
                state.timer = None;
                state.pending.take()
            };
            if let Some(value) = value {
                sink(value);
            }
        }));
    }

    /// Deliver the pending value now, if any.
    pub fn flush(&self) {
        let value = {
            let mut state = self.state.lock();
            state.generation += 1;
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            state.pending.take()
        };
        if let Some(value) = value {
            (self.sink)(value);
        }
    }

    /// Drop the pending value without delivering it.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        state.generation += 1;
        state.pending = None;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state.lock().pending.is_some()
    }

    /// Cancel and refuse further calls.
    pub fn destroy(&self) {
        self.cancel();
        self.state.lock().destroyed = true;
    }
}

impl<T: Send + 'static> Drop for Debouncer<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

struct ThrottleState<T> {
    last_fired: Option<Instant>,
    trailing: Option<T>,
    timer: Option<JoinHandle<()>>,
    generation: u64,
    destroyed: bool,
}

/// Delivers at most once per `interval`; calls inside the window are
/// collapsed into one trailing delivery of the latest value.
pub struct Throttler<T: Send + 'static> {
    state: Arc<Mutex<ThrottleState<T>>>,
    sink: Sink<T>,
    interval: Duration,
}

impl<T: Send + 'static> Throttler<T> {
    pub fn new(interval: Duration, sink: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            state: Arc::new(Mutex::new(ThrottleState {
                last_fired: None,
                trailing: None,
                timer: None,
                generation: 0,
                destroyed: false,
            })),
            sink: Arc::new(sink),
            interval,
        }
    }

    pub fn call(&self, value: T) {
        let now = Instant::now();
        let mut state = self.state.lock();
        if state.destroyed {
            return;
        }

        let window_open = state
            .last_fired
            .map_or(true, |last| now.duration_since(last) >= self.interval);
        if window_open && state.timer.is_none() {
            state.last_fired = Some(now);
            drop(state);
            (self.sink)(value);
            return;
        }

        state.trailing = Some(value);
        if state.timer.is_some() {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            warn!("Throttler used outside a runtime; trailing value held until flush");
            return;
        };
        let deadline = state.last_fired.map_or(now, |last| last + self.interval);
        let generation = state.generation;
        let shared = Arc::clone(&self.state);
        let sink = Arc::clone(&self.sink);
        state.timer = Some(runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let value = {
                let mut state = shared.lock();
                if state.generation != generation {
                    return;
                }
                state.timer = None;
                let value = state.trailing.take();
                if value.is_some() {
                    state.last_fired = Some(Instant::now());
                }
                value
            };
            if let Some(value) = value {
                sink(value);
            }
        }));
    }

    /// Deliver the trailing value now, if any.
    pub fn flush(&self) {
        let value = {
            let mut state = self.state.lock();
            state.generation += 1;
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            let value = state.trailing.take();
            if value.is_some() {
                state.last_fired = Some(Instant::now());
            }
            value
        };
        if let Some(value) = value {
            (self.sink)(value);
        }
    }

    pub fn cancel(&self) {
        let mut state = self.state.lock();
        state.generation += 1;
        state.trailing = None;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }

    pub fn destroy(&self) {
        self.cancel();
        self.state.lock().destroyed = true;
    }
}

impl<T: Send + 'static> Drop for Throttler<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Debounced emitter for one bus event.
pub struct DebouncedEvent {
    event: String,
    inner: Debouncer<Payload>,
}

impl DebouncedEvent {
    pub(crate) fn new(bus: EventBus, event: &str, delay: Duration) -> Self {
        let name = event.to_string();
        let inner = Debouncer::new(delay, move |payload| {
            debug!(event = %name, "Debounced emit");
            bus.emit(&name, payload);
        });
        Self {
            event: event.to_string(),
            inner,
        }
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn emit(&self, payload: Payload) {
        self.inner.call(payload);
    }

    pub fn flush(&self) {
        self.inner.flush();
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn destroy(&self) {
        self.inner.destroy();
    }
}

/// Throttled emitter for one bus event.
pub struct ThrottledEvent {
    event: String,
    inner: Throttler<Payload>,
}

impl ThrottledEvent {
    pub(crate) fn new(bus: EventBus, event: &str, interval: Duration) -> Self {
        let name = event.to_string();
        let inner = Throttler::new(interval, move |payload| {
            bus.emit(&name, payload);
        });
        Self {
            event: event.to_string(),
            inner,
        }
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn emit(&self, payload: Payload) {
        self.inner.call(payload);
    }

    pub fn flush(&self) {
        self.inner.flush();
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn destroy(&self) {
        self.inner.destroy();
    }
}
