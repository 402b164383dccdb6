//! Logging setup for keel hosts.

pub mod logger;

pub use logger::{env_filter, init_logger};
