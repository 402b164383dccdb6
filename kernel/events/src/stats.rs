//! Per-event usage statistics with a retention window.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// Usage counters for one event name.
#[derive(Debug, Clone)]
pub struct EventStats {
    pub emit_count: u64,
    pub error_count: u64,
    pub last_emitted: Instant,
}

pub(crate) struct StatsTable {
    entries: HashMap<String, EventStats>,
    retention: Duration,
    emits_since_prune: u64,
}

/// Emits between opportunistic prunes on the hot path.
const PRUNE_EVERY: u64 = 1024;

impl StatsTable {
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            retention,
            emits_since_prune: 0,
        }
    }

    pub fn record_emit(&mut self, event: &str) {
        let now = Instant::now();
        match self.entries.get_mut(event) {
            Some(stats) => {
                stats.emit_count += 1;
                stats.last_emitted = now;
            }
            None => {
                self.entries.insert(
                    event.to_string(),
                    EventStats {
                        emit_count: 1,
                        error_count: 0,
                        last_emitted: now,
                    },
                );
            }
        }
        self.emits_since_prune += 1;
        if self.emits_since_prune >= PRUNE_EVERY {
            self.prune();
        }
    }

    pub fn record_error(&mut self, event: &str) {
        if let Some(stats) = self.entries.get_mut(event) {
            stats.error_count += 1;
        }
    }

    pub fn get(&self, event: &str) -> Option<EventStats> {
        self.entries.get(event).cloned()
    }

    /// Drop entries not emitted within the retention window. Returns how many were dropped.
    pub fn prune(&mut self) -> usize {
        self.emits_since_prune = 0;
        let retention = self.retention;
        let before = self.entries.len();
        self.entries
            .retain(|_, stats| stats.last_emitted.elapsed() < retention);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn prune_drops_stale_entries() {
        let mut table = StatsTable::new(Duration::from_secs(10));
        table.record_emit("old");
        tokio::time::advance(Duration::from_secs(8)).await;
        table.record_emit("fresh");
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(table.prune(), 1);
        assert!(table.get("old").is_none());
        assert_eq!(table.get("fresh").unwrap().emit_count, 1);
    }

    #[test]
    fn errors_count_against_existing_entry() {
        let mut table = StatsTable::new(Duration::from_secs(60));
        table.record_emit("save");
        table.record_emit("save");
        table.record_error("save");
        table.record_error("unknown");
        let stats = table.get("save").unwrap();
        assert_eq!(stats.emit_count, 2);
        assert_eq!(stats.error_count, 1);
        assert_eq!(table.len(), 1);
    }
}
