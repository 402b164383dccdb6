//! `keel-lifecycle`: named lifecycle hooks.

pub mod hook;
pub mod manager;

pub use hook::LifecycleHook;
pub use manager::{HookFailure, HookHandle, HookId, LifecycleManager, TriggerReport};
