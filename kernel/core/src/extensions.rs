//! Typed extension points.
//!
//! Plugins attach their own services to the engine through this map instead
//! of adding ad-hoc fields to it. Entries are keyed by name and retrieved as a
//! concrete type; a lookup with the wrong type returns `None`.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

type Entry = Arc<dyn Any + Send + Sync>;

/// Shared, cloneable map of named services.
#[derive(Default, Clone)]
pub struct Extensions {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a service under `name`, returning the previous entry if it had type `T`.
    pub fn insert<T: Any + Send + Sync>(&self, name: impl Into<String>, value: T) -> Option<Arc<T>> {
        let previous = self.entries.write().insert(name.into(), Arc::new(value));
        previous.and_then(|p| p.downcast::<T>().ok())
    }

    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let entry = self.entries.read().get(name).cloned()?;
        entry.downcast::<T>().ok()
    }

    /// Insert keyed by the type itself, for singleton services.
    pub fn provide<T: Any + Send + Sync>(&self, value: T) -> Option<Arc<T>> {
        self.insert(type_key::<T>(), value)
    }

    pub fn require<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.get::<T>(&type_key::<T>())
    }

    pub fn remove(&self, name: &str) -> bool {
        self.entries.write().remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl std::fmt::Debug for Extensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extensions")
            .field("names", &self.names())
            .finish()
    }
}

fn type_key<T: Any>() -> String {
    format!("{}#{:?}", std::any::type_name::<T>(), TypeId::of::<T>())
}
