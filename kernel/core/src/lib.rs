//! `keel-core`: types shared by every kernel component.
//!
//! Provides:
//! - The kernel error taxonomy (`KernelError`)
//! - Dot-path parsing for the state tree
//! - Glob-style path patterns (`*`, `**`)
//! - The typed extension map plugins use to attach services

pub mod error;
pub mod extensions;
pub mod path;
pub mod pattern;

pub use error::{KernelError, KernelResult};
pub use extensions::Extensions;
pub use path::DotPath;
pub use pattern::PathPattern;

/// Value carried by events, state entries and lifecycle hook arguments.
pub type Payload = serde_json::Value;
