//! Listener records and the slot pool that stores them.
//!
//! Listener slots are recycled through a free-list so that heavy
//! subscribe/unsubscribe churn reuses storage instead of growing it. Each slot
//! carries a generation counter; a `ListenerId` from a released slot never
//! matches the listener that later reuses it.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use keel_core::Payload;

pub(crate) type SyncHandler = Arc<dyn Fn(&Payload) -> anyhow::Result<()> + Send + Sync>;
pub(crate) type AsyncHandler =
    Arc<dyn Fn(Payload) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Clone)]
pub(crate) enum Handler {
    Sync(SyncHandler),
    Async(AsyncHandler),
}

/// Stable handle to a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId {
    slot: u32,
    generation: u32,
}

/// Registration options for a listener.
#[derive(Debug, Clone, Default)]
pub struct ListenerOptions {
    pub priority: i32,
    pub once: bool,
    pub namespace: Option<String>,
}

impl ListenerOptions {
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

pub(crate) struct Listener {
    pub id: ListenerId,
    pub event: String,
    pub handler: Handler,
    pub once: bool,
    pub priority: i32,
    pub namespace: Option<String>,
    /// Registration sequence, the tie-breaker for equal priorities.
    pub seq: u64,
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("event", &self.event)
            .field("once", &self.once)
            .field("priority", &self.priority)
            .field("namespace", &self.namespace)
            .field("async", &matches!(self.handler, Handler::Async(_)))
            .finish()
    }
}

struct Slot {
    generation: u32,
    listener: Option<Arc<Listener>>,
}

#[derive(Default)]
pub(crate) struct ListenerPool {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl ListenerPool {
    pub fn insert(&mut self, build: impl FnOnce(ListenerId) -> Listener) -> ListenerId {
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    listener: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let entry = &mut self.slots[slot as usize];
        let id = ListenerId {
            slot,
            generation: entry.generation,
        };
        entry.listener = Some(Arc::new(build(id)));
        self.live += 1;
        id
    }

    pub fn get(&self, id: ListenerId) -> Option<&Arc<Listener>> {
        let slot = self.slots.get(id.slot as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.listener.as_ref()
    }

    /// Release a listener and return its slot to the free-list.
    pub fn remove(&mut self, id: ListenerId) -> Option<Arc<Listener>> {
        let slot = self.slots.get_mut(id.slot as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let listener = slot.listener.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.slot);
        self.live -= 1;
        Some(listener)
    }

    pub fn len(&self) -> usize {
        self.live
    }

    /// Number of released slots waiting for reuse.
    pub fn free_slots(&self) -> usize {
        self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
