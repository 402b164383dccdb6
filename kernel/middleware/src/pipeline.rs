//! Onion-model middleware pipeline.
//!
//! Middleware are sorted by priority (highest first, registration order for
//! ties) and each receives a [`Next`] to call into the rest of the chain.
//! Code before `next.run(ctx)` runs in priority order, code after it runs in
//! reverse as the chain unwinds. Not calling `next` short-circuits.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use keel_core::{KernelError, KernelResult};
use parking_lot::RwLock;
use tracing::debug;

use crate::context::MiddlewareContext;

#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    fn priority(&self) -> i32 {
        0
    }

    async fn execute(&self, ctx: &mut MiddlewareContext, next: Next<'_>) -> Result<()>;
}

/// The remainder of the chain below the current middleware.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    /// Run the rest of the chain. The innermost `next` is a no-op.
    pub async fn run(self, ctx: &mut MiddlewareContext) -> Result<()> {
        let Some((head, rest)) = self.chain.split_first() else {
            return Ok(());
        };
        head.execute(ctx, Next { chain: rest })
            .await
            .map_err(|e| attribute(head.name(), e))
    }

    /// Middleware still below this point.
    pub fn remaining(&self) -> usize {
        self.chain.len()
    }
}

/// Tag an error with the middleware that raised it, unless an inner one already did.
fn attribute(name: &str, err: anyhow::Error) -> anyhow::Error {
    if matches!(
        err.downcast_ref::<KernelError>(),
        Some(KernelError::MiddlewareExecutionFailed { .. })
    ) {
        return err;
    }
    KernelError::MiddlewareExecutionFailed {
        middleware: name.to_string(),
        source: err,
    }
    .into()
}

type MiddlewareFuture<'a> = BoxFuture<'a, Result<()>>;

/// A middleware built from a closure. See [`middleware_fn`].
pub struct FnMiddleware<F> {
    name: String,
    priority: i32,
    handler: F,
}

/// Build a middleware from a closure returning a boxed future.
pub fn middleware_fn<F>(name: impl Into<String>, priority: i32, handler: F) -> FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut MiddlewareContext, Next<'a>) -> MiddlewareFuture<'a> + Send + Sync,
{
    FnMiddleware {
        name: name.into(),
        priority,
        handler,
    }
}

#[async_trait]
impl<F> Middleware for FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut MiddlewareContext, Next<'a>) -> MiddlewareFuture<'a> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn execute(&self, ctx: &mut MiddlewareContext, next: Next<'_>) -> Result<()> {
        (self.handler)(ctx, next).await
    }
}

struct Entry {
    seq: u64,
    middleware: Arc<dyn Middleware>,
}

#[derive(Default)]
struct PipelineInner {
    entries: Vec<Entry>,
    sorted: Option<Arc<[Arc<dyn Middleware>]>>,
    next_seq: u64,
}

impl PipelineInner {
    fn snapshot(&mut self) -> Arc<[Arc<dyn Middleware>]> {
        if let Some(sorted) = &self.sorted {
            return Arc::clone(sorted);
        }
        let mut order: Vec<&Entry> = self.entries.iter().collect();
        order.sort_by(|a, b| {
            b.middleware
                .priority()
                .cmp(&a.middleware.priority())
                .then(a.seq.cmp(&b.seq))
        });
        let sorted: Arc<[Arc<dyn Middleware>]> =
            order.into_iter().map(|e| Arc::clone(&e.middleware)).collect();
        self.sorted = Some(Arc::clone(&sorted));
        sorted
    }
}

/// Cloneable handle to a shared middleware chain.
#[derive(Clone, Default)]
pub struct MiddlewarePipeline {
    inner: Arc<RwLock<PipelineInner>>,
}

impl MiddlewarePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a middleware. One with the same name is replaced in place.
    pub fn use_middleware(&self, middleware: impl Middleware + 'static) {
        self.use_arc(Arc::new(middleware));
    }

    pub fn use_arc(&self, middleware: Arc<dyn Middleware>) {
        let mut inner = self.inner.write();
        inner.sorted = None;
        if let Some(existing) = inner
            .entries
            .iter_mut()
            .find(|e| e.middleware.name() == middleware.name())
        {
            debug!(middleware = %middleware.name(), "Replacing middleware");
            existing.middleware = middleware;
            return;
        }
        debug!(middleware = %middleware.name(), priority = middleware.priority(), "Middleware registered");
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.push(Entry { seq, middleware });
    }

    pub fn remove(&self, name: &str) -> bool {
        let mut inner = self.inner.write();
        let before = inner.entries.len();
        inner.entries.retain(|e| e.middleware.name() != name);
        let removed = inner.entries.len() != before;
        if removed {
            inner.sorted = None;
        }
        removed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().entries.iter().any(|e| e.middleware.name() == name)
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names in execution order.
    pub fn names(&self) -> Vec<String> {
        self.inner
            .write()
            .snapshot()
            .iter()
            .map(|m| m.name().to_string())
            .collect()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.sorted = None;
    }

    /// Run the chain over `ctx`. The first uncaught middleware error is returned.
    pub async fn execute(&self, ctx: &mut MiddlewareContext) -> KernelResult<()> {
        let chain = self.inner.write().snapshot();
        debug!(action = %ctx.action, middleware = chain.len(), "Executing middleware");
        Next { chain: &chain[..] }
            .run(ctx)
            .await
            .map_err(|e| e.downcast::<KernelError>().unwrap_or_else(KernelError::Other))
    }
}
