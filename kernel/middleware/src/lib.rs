//! `keel-middleware`: priority-sorted onion pipeline.

pub mod context;
pub mod pipeline;

pub use context::MiddlewareContext;
pub use pipeline::{middleware_fn, FnMiddleware, Middleware, MiddlewarePipeline, Next};
