//! Watcher registry: exact-path and pattern watchers.

use std::collections::HashMap;
use std::sync::Arc;

use keel_core::{PathPattern, Payload};

/// Exact watcher callback: `(new_value, old_value)`; absent values are `Null`.
pub type WatchCallback = Arc<dyn Fn(&Payload, &Payload) + Send + Sync>;

/// Pattern watcher callback: `(path, new_value, old_value)`.
pub type PatternCallback = Arc<dyn Fn(&str, &Payload, &Payload) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatcherId(pub(crate) u64);

pub(crate) enum Callback {
    Exact(WatchCallback),
    Pattern(PatternCallback),
}

#[derive(Default)]
pub(crate) struct Watchers {
    exact: HashMap<String, Vec<(WatcherId, WatchCallback)>>,
    patterns: Vec<(WatcherId, PathPattern, PatternCallback)>,
    next_id: u64,
}

impl Watchers {
    fn next(&mut self) -> WatcherId {
        self.next_id += 1;
        WatcherId(self.next_id)
    }

    pub fn add_exact(&mut self, path: String, callback: WatchCallback) -> WatcherId {
        let id = self.next();
        self.exact.entry(path).or_default().push((id, callback));
        id
    }

    pub fn add_pattern(&mut self, pattern: PathPattern, callback: PatternCallback) -> WatcherId {
        let id = self.next();
        self.patterns.push((id, pattern, callback));
        id
    }

    pub fn remove(&mut self, id: WatcherId) -> bool {
        let before = self.len();
        self.exact.retain(|_, list| {
            list.retain(|(existing, _)| *existing != id);
            !list.is_empty()
        });
        self.patterns.retain(|(existing, _, _)| *existing != id);
        before != self.len()
    }

    /// Callbacks interested in `path`, exact watchers first, each group in registration order.
    pub fn matching(&self, path: &str) -> Vec<Callback> {
        let mut out: Vec<Callback> = self
            .exact
            .get(path)
            .into_iter()
            .flatten()
            .map(|(_, cb)| Callback::Exact(Arc::clone(cb)))
            .collect();
        out.extend(
            self.patterns
                .iter()
                .filter(|(_, pattern, _)| pattern.matches(path))
                .map(|(_, _, cb)| Callback::Pattern(Arc::clone(cb))),
        );
        out
    }

    pub fn len(&self) -> usize {
        self.exact.values().map(Vec::len).sum::<usize>() + self.patterns.len()
    }

    pub fn clear(&mut self) {
        self.exact.clear();
        self.patterns.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_and_removal() {
        let mut w = Watchers::default();
        let a = w.add_exact("user.name".into(), Arc::new(|_: &Payload, _: &Payload| {}));
        w.add_pattern(
            PathPattern::compile("user.*").unwrap(),
            Arc::new(|_: &str, _: &Payload, _: &Payload| {}),
        );
        assert_eq!(w.matching("user.name").len(), 2);
        assert_eq!(w.matching("user.age").len(), 1);
        assert_eq!(w.matching("cart").len(), 0);

        assert!(w.remove(a));
        assert!(!w.remove(a));
        assert_eq!(w.len(), 1);
    }
}
