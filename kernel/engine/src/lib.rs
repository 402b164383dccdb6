//! `keel-engine`: the kernel's composition root.
//!
//! An [`Engine`] owns one event bus, state store, middleware pipeline,
//! lifecycle manager and plugin manager. The component crates are
//! re-exported so adapters can depend on this crate alone.

pub mod engine;
pub mod phase;

pub use engine::{Engine, EngineBuilder};
pub use phase::EnginePhase;

pub use keel_config::{self as config, EngineConfig};
pub use keel_core::{DotPath, Extensions, KernelError, KernelResult, PathPattern, Payload};
pub use keel_events::{self as events, names, EventBus, ListenerOptions, Namespace, Subscription};
pub use keel_lifecycle::{LifecycleHook, LifecycleManager, TriggerReport};
pub use keel_logging::init_logger;
pub use keel_middleware::{middleware_fn, Middleware, MiddlewareContext, MiddlewarePipeline, Next};
pub use keel_plugins::{Plugin, PluginContext, PluginInfo, PluginManager, PluginState};
pub use keel_state::{MemoryLoader, StateLoader, StateStore, TransactionOptions, WatchHandle};
