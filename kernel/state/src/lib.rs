//! `keel-state`: the reactive state store.
//!
//! One nested JSON tree addressed by dot-paths, with exact and glob-pattern
//! watchers, coalescing batches and snapshot-based transactions.

pub mod loader;
pub mod store;
mod tree;
pub mod watch;

pub use loader::{LoaderCallback, MemoryLoader, StateLoader};
pub use store::{StateChange, StateStore, TransactionOptions, WatchHandle};
pub use watch::{PatternCallback, WatchCallback, WatcherId};
