//! The engine: one event bus, state store, middleware pipeline, lifecycle
//! manager and plugin manager, wired together and driven through
//! `init → mount → unmount → destroy`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use keel_config::{validate, EngineConfig};
use keel_core::{Extensions, KernelError, KernelResult, Payload};
use keel_events::{names, BusOptions, EventBus, MaintenanceHandle};
use keel_lifecycle::{LifecycleHook, LifecycleManager};
use keel_middleware::MiddlewarePipeline;
use keel_plugins::{Plugin, PluginManager, PluginServices};
use keel_state::{StateLoader, StateStore};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::phase::EnginePhase;

struct EngineInner {
    id: Uuid,
    created_at: DateTime<Utc>,
    config: EngineConfig,
    events: EventBus,
    state: StateStore,
    middleware: MiddlewarePipeline,
    lifecycle: LifecycleManager,
    plugins: PluginManager,
    extensions: Extensions,
    loader: Option<Arc<dyn StateLoader>>,
    /// Set once the loader's state is merged and its watch is registered.
    loaded: AtomicBool,
    phase: Mutex<EnginePhase>,
    maintenance: Mutex<Option<MaintenanceHandle>>,
}

/// Cloneable handle to one kernel instance. Hand it to adapters explicitly.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    loader: Option<Arc<dyn StateLoader>>,
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Loader asked for the initial tree at `init` and used by `save_state`/`load_state`.
    pub fn loader(mut self, loader: impl StateLoader + 'static) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    pub fn build(self) -> KernelResult<Engine> {
        let config = self.config;
        let report = validate(&config);
        for warning in &report.warnings {
            warn!(path = %warning.path, "{}", warning.message);
        }
        if !report.is_valid() {
            return Err(KernelError::Config(report.summary()));
        }

        let events = EventBus::with_options(BusOptions {
            max_listeners: config.events.max_listeners,
            stats_retention: config.events.stats_retention(),
        });
        let state = if config.state.emit_changes {
            StateStore::with_events(events.clone())
        } else {
            StateStore::new()
        };
        state.replace(config.state.initial.clone())?;

        let middleware = MiddlewarePipeline::new();
        let lifecycle = LifecycleManager::new();
        let extensions = Extensions::new();
        let plugins = PluginManager::new(PluginServices {
            state: state.clone(),
            events: events.clone(),
            middleware: middleware.clone(),
            lifecycle: lifecycle.clone(),
            extensions: extensions.clone(),
        })
        .with_disabled(config.plugins.disabled.iter().cloned());

        let engine = Engine {
            inner: Arc::new(EngineInner {
                id: Uuid::new_v4(),
                created_at: Utc::now(),
                config,
                events,
                state,
                middleware,
                lifecycle,
                plugins,
                extensions,
                loader: self.loader,
                loaded: AtomicBool::new(false),
                phase: Mutex::new(EnginePhase::Created),
                maintenance: Mutex::new(None),
            }),
        };
        debug!(engine = %engine.id(), name = %engine.config().name, "Engine created");
        Ok(engine)
    }
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn new(config: EngineConfig) -> KernelResult<Self> {
        Self::builder().config(config).build()
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn state(&self) -> &StateStore {
        &self.inner.state
    }

    pub fn middleware(&self) -> &MiddlewarePipeline {
        &self.inner.middleware
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.inner.lifecycle
    }

    pub fn plugins(&self) -> &PluginManager {
        &self.inner.plugins
    }

    /// Typed services attached by plugins or the host.
    pub fn extensions(&self) -> &Extensions {
        &self.inner.extensions
    }

    pub fn phase(&self) -> EnginePhase {
        *self.inner.phase.lock()
    }

    /// Add a plugin. Before `init` it is queued and installed, dependencies
    /// first, when `init` runs. Afterwards it is installed immediately and
    /// its dependencies must already be present.
    pub async fn use_plugin(&self, plugin: impl Plugin + 'static) -> KernelResult<()> {
        let phase = self.phase();
        match phase {
            EnginePhase::Destroyed => Err(KernelError::InvalidPhase {
                expected: "not destroyed".into(),
                actual: phase.to_string(),
            }),
            p if p.installs_immediately() => self.inner.plugins.use_plugin(plugin).await,
            _ => self.inner.plugins.register(plugin).map(|_| ()),
        }
    }

    /// Load persisted state, install queued plugins and become `Ready`.
    ///
    /// On failure the engine returns to `Created`; plugins installed before
    /// the failure stay installed and the rest stay queued. The loader is
    /// read and watched only by the first attempt that reaches it.
    pub async fn init(&self) -> KernelResult<()> {
        self.transition(&[EnginePhase::Created], EnginePhase::Initializing)?;
        info!(engine = %self.id(), name = %self.config().name, "Initializing engine");

        match self.run_init().await {
            Ok(()) => {
                self.set_phase(EnginePhase::Ready);
                self.hook(LifecycleHook::AfterInit).await;
                let installed = self.inner.plugins.installed();
                info!(engine = %self.id(), plugins = installed.len(), "Engine ready");
                self.inner.events.emit(
                    names::ENGINE_READY,
                    json!({ "id": self.id().to_string(), "plugins": installed }),
                );
                Ok(())
            }
            Err(err) => {
                self.set_phase(EnginePhase::Created);
                self.report_error("init", &err).await;
                Err(err)
            }
        }
    }

    async fn run_init(&self) -> KernelResult<()> {
        self.hook(LifecycleHook::BeforeInit).await;

        if let Some(loader) = &self.inner.loader {
            if !self.inner.loaded.load(Ordering::SeqCst) {
                let loaded = loader.load().await.map_err(|e| {
                    KernelError::Loader(format!("{} load failed: {e:#}", loader.name()))
                })?;
                self.merge_loaded(loaded)?;
                let store = self.inner.state.clone();
                let watching = loader.watch(Arc::new(move |next: Payload| {
                    if let Err(e) = store.replace(next) {
                        warn!(error = %e, "Ignoring external state update");
                    }
                }));
                self.inner.loaded.store(true, Ordering::SeqCst);
                debug!(loader = loader.name(), watching, "State loaded");
            }
        }

        self.inner.plugins.install_pending().await?;
        self.hook(LifecycleHook::Init).await;

        if let Some(every) = self.config().events.maintenance_interval() {
            *self.inner.maintenance.lock() = self.inner.events.spawn_maintenance(every);
        }
        Ok(())
    }

    /// Loaded top-level keys override the configured initial state.
    fn merge_loaded(&self, loaded: Payload) -> KernelResult<()> {
        let Value::Object(loaded) = loaded else {
            return Err(KernelError::Loader("loaded state is not an object".into()));
        };
        let mut tree = match self.inner.state.snapshot() {
            Value::Object(map) => map,
            _ => Default::default(),
        };
        tree.extend(loaded);
        self.inner.state.replace(Value::Object(tree))
    }

    pub async fn mount(&self) -> KernelResult<()> {
        self.require(&[EnginePhase::Ready, EnginePhase::Unmounted])?;
        self.hook(LifecycleHook::BeforeMount).await;
        self.set_phase(EnginePhase::Mounted);
        self.hook(LifecycleHook::Mounted).await;
        self.inner.events.emit(names::ENGINE_MOUNTED, json!({ "id": self.id().to_string() }));
        debug!(engine = %self.id(), "Engine mounted");
        Ok(())
    }

    pub async fn unmount(&self) -> KernelResult<()> {
        self.require(&[EnginePhase::Mounted])?;
        self.hook(LifecycleHook::BeforeUnmount).await;
        self.set_phase(EnginePhase::Unmounted);
        self.hook(LifecycleHook::Unmounted).await;
        self.inner.events.emit(names::ENGINE_UNMOUNTED, json!({ "id": self.id().to_string() }));
        debug!(engine = %self.id(), "Engine unmounted");
        Ok(())
    }

    /// Unmount if needed, uninstall every plugin in reverse install order and
    /// drop all listeners, watchers, middleware and hooks. Idempotent.
    pub async fn destroy(&self) -> KernelResult<()> {
        match self.phase() {
            EnginePhase::Destroyed => return Ok(()),
            EnginePhase::Mounted => self.unmount().await?,
            EnginePhase::Initializing => {
                return Err(KernelError::InvalidPhase {
                    expected: "not initializing".into(),
                    actual: EnginePhase::Initializing.to_string(),
                })
            }
            _ => {}
        }

        self.hook(LifecycleHook::BeforeDestroy).await;
        let removed = self.inner.plugins.uninstall_all().await;
        if let Some(handle) = self.inner.maintenance.lock().take() {
            handle.stop();
        }
        self.set_phase(EnginePhase::Destroyed);
        self.hook(LifecycleHook::Destroyed).await;
        self.inner.events.emit(
            names::ENGINE_DESTROYED,
            json!({ "id": self.id().to_string(), "plugins": removed }),
        );

        self.inner.events.clear();
        self.inner.state.clear_watchers();
        self.inner.middleware.clear();
        self.inner.lifecycle.clear_all();
        info!(engine = %self.id(), "Engine destroyed");
        Ok(())
    }

    pub async fn save_state(&self) -> KernelResult<()> {
        let loader = self.loader()?;
        loader
            .save(&self.inner.state.snapshot())
            .await
            .map_err(|e| KernelError::Loader(format!("{} save failed: {e:#}", loader.name())))
    }

    /// Replace the whole tree with what the loader returns.
    pub async fn load_state(&self) -> KernelResult<()> {
        let loader = self.loader()?;
        let loaded = loader
            .load()
            .await
            .map_err(|e| KernelError::Loader(format!("{} load failed: {e:#}", loader.name())))?;
        if !loaded.is_object() {
            return Err(KernelError::Loader("loaded state is not an object".into()));
        }
        self.inner.state.replace(loaded)
    }

    fn loader(&self) -> KernelResult<&Arc<dyn StateLoader>> {
        self.inner
            .loader
            .as_ref()
            .ok_or_else(|| KernelError::Loader("no state loader configured".into()))
    }

    fn require(&self, allowed: &[EnginePhase]) -> KernelResult<()> {
        check_phase(*self.inner.phase.lock(), allowed)
    }

    /// Check the current phase against `from` and move to `to` in one step.
    fn transition(&self, from: &[EnginePhase], to: EnginePhase) -> KernelResult<()> {
        let mut phase = self.inner.phase.lock();
        check_phase(*phase, from)?;
        *phase = to;
        Ok(())
    }

    fn set_phase(&self, next: EnginePhase) {
        let mut phase = self.inner.phase.lock();
        debug!(engine = %self.inner.id, from = phase.as_str(), to = next.as_str(), "Engine phase");
        *phase = next;
    }

    async fn hook(&self, hook: LifecycleHook) {
        let args = json!({ "engine": self.id().to_string(), "phase": self.phase() });
        let report = self.inner.lifecycle.trigger(hook, args).await;
        if !report.is_ok() {
            warn!(
                engine = %self.id(),
                hook = %report.hook,
                failed = report.failures.len(),
                "Lifecycle hook had failures"
            );
        }
    }

    async fn report_error(&self, stage: &str, err: &KernelError) {
        error!(engine = %self.id(), stage, error = %err, "Engine error");
        let payload = json!({ "stage": stage, "kind": err.kind(), "message": err.to_string() });
        self.inner.events.emit(names::ENGINE_ERROR, payload.clone());
        self.inner.lifecycle.trigger(LifecycleHook::Error, payload).await;
    }
}

fn check_phase(actual: EnginePhase, allowed: &[EnginePhase]) -> KernelResult<()> {
    if allowed.contains(&actual) {
        return Ok(());
    }
    let expected: Vec<&str> = allowed.iter().map(|p| p.as_str()).collect();
    Err(KernelError::InvalidPhase {
        expected: expected.join(" or "),
        actual: actual.to_string(),
    })
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.inner.id)
            .field("name", &self.inner.config.name)
            .field("phase", &self.phase())
            .field("plugins", &self.inner.plugins.installed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use keel_middleware::{middleware_fn, MiddlewareContext};
    use keel_plugins::PluginContext;
    use keel_state::MemoryLoader;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        deps: Vec<String>,
        log: Log,
    }

    fn recorder(name: &'static str, deps: &[&str], log: &Log) -> Recorder {
        Recorder {
            name,
            deps: deps.iter().map(|d| d.to_string()).collect(),
            log: Arc::clone(log),
        }
    }

    #[async_trait]
    impl Plugin for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn dependencies(&self) -> Vec<String> {
            self.deps.clone()
        }

        async fn install(&self, _ctx: &PluginContext) -> anyhow::Result<()> {
            self.log.lock().push(format!("install:{}", self.name));
            Ok(())
        }

        async fn uninstall(&self, _ctx: &PluginContext) -> anyhow::Result<()> {
            self.log.lock().push(format!("uninstall:{}", self.name));
            Ok(())
        }
    }

    /// Counts saves through a middleware and exposes the counter as a service.
    struct SaveCounter;

    struct Saves(AtomicUsize);

    #[async_trait]
    impl Plugin for SaveCounter {
        fn name(&self) -> &str {
            "save-counter"
        }

        async fn install(&self, ctx: &PluginContext) -> anyhow::Result<()> {
            ctx.extensions.provide(Saves(AtomicUsize::new(0)));
            let extensions = ctx.extensions.clone();
            let state = ctx.state.clone();
            ctx.middleware.use_middleware(middleware_fn("count-saves", 0, move |mctx, next| {
                let extensions = extensions.clone();
                let state = state.clone();
                Box::pin(async move {
                    if mctx.action == "save" {
                        if let Some(saves) = extensions.require::<Saves>() {
                            let n = saves.0.fetch_add(1, Ordering::SeqCst) + 1;
                            state.set("saves", n)?;
                        }
                    }
                    next.run(mctx).await
                })
            }));
            Ok(())
        }
    }

    struct Unreachable;

    #[async_trait]
    impl Plugin for Unreachable {
        fn name(&self) -> &str {
            "remote-config"
        }

        async fn install(&self, _ctx: &PluginContext) -> anyhow::Result<()> {
            anyhow::bail!("backend unreachable")
        }
    }

    fn engine() -> Engine {
        Engine::new(EngineConfig::default()).unwrap()
    }

    fn capture(engine: &Engine, event: &str) -> Arc<Mutex<Vec<Payload>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        engine.events().on(event, move |payload| {
            s.lock().push(payload.clone());
            Ok(())
        });
        seen
    }

    #[tokio::test]
    async fn queued_plugin_waits_for_its_dependency() {
        let log: Log = Arc::default();
        let engine = engine();
        engine.use_plugin(recorder("a", &["b"], &log)).await.unwrap();
        engine.use_plugin(recorder("b", &[], &log)).await.unwrap();
        assert!(log.lock().is_empty());

        engine.init().await.unwrap();
        assert_eq!(engine.plugins().installed(), vec!["b", "a"]);
        assert_eq!(*log.lock(), vec!["install:b", "install:a"]);
        assert_eq!(engine.phase(), EnginePhase::Ready);
    }

    #[tokio::test]
    async fn after_init_dependencies_must_exist() {
        let log: Log = Arc::default();
        let engine = engine();
        engine.init().await.unwrap();
        let err = engine
            .use_plugin(recorder("charts", &["data"], &log))
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::MissingDependency { .. }));

        engine.use_plugin(recorder("data", &[], &log)).await.unwrap();
        engine.use_plugin(recorder("charts", &["data"], &log)).await.unwrap();
        assert_eq!(*log.lock(), vec!["install:data", "install:charts"]);
    }

    #[tokio::test]
    async fn phases_and_hooks_run_in_order() {
        let engine = engine();
        let hooks: Log = Arc::default();
        for hook in [
            LifecycleHook::BeforeInit,
            LifecycleHook::Init,
            LifecycleHook::AfterInit,
            LifecycleHook::BeforeMount,
            LifecycleHook::Mounted,
            LifecycleHook::BeforeUnmount,
            LifecycleHook::Unmounted,
            LifecycleHook::BeforeDestroy,
            LifecycleHook::Destroyed,
        ] {
            let h = Arc::clone(&hooks);
            let name = hook.to_string();
            engine.lifecycle().on(hook, move |_| {
                h.lock().push(name.clone());
                async { Ok(()) }
            });
        }
        let engine_events = capture(&engine, names::ENGINE_MOUNTED);

        assert!(matches!(engine.mount().await, Err(KernelError::InvalidPhase { .. })));
        engine.init().await.unwrap();
        assert!(matches!(engine.init().await, Err(KernelError::InvalidPhase { .. })));
        engine.mount().await.unwrap();
        assert_eq!(engine.phase(), EnginePhase::Mounted);
        assert_eq!(engine_events.lock().len(), 1);
        engine.destroy().await.unwrap();
        assert_eq!(engine.phase(), EnginePhase::Destroyed);
        engine.destroy().await.unwrap();

        assert_eq!(
            *hooks.lock(),
            vec![
                "beforeInit",
                "init",
                "afterInit",
                "beforeMount",
                "mounted",
                "beforeUnmount",
                "unmounted",
                "beforeDestroy",
                "destroyed",
            ]
        );
    }

    #[tokio::test]
    async fn destroy_uninstalls_in_reverse_and_clears_listeners() {
        let log: Log = Arc::default();
        let engine = engine();
        engine.use_plugin(recorder("core", &[], &log)).await.unwrap();
        engine.use_plugin(recorder("ui", &["core"], &log)).await.unwrap();
        engine.init().await.unwrap();
        engine.events().on("custom", |_| Ok(()));
        let destroyed = capture(&engine, names::ENGINE_DESTROYED);
        log.lock().clear();

        engine.destroy().await.unwrap();
        assert_eq!(*log.lock(), vec!["uninstall:ui", "uninstall:core"]);
        assert_eq!(destroyed.lock()[0]["plugins"], json!(["ui", "core"]));
        assert_eq!(engine.events().listener_count("custom"), 0);

        let err = engine.use_plugin(recorder("late", &[], &log)).await.unwrap_err();
        assert!(matches!(err, KernelError::InvalidPhase { .. }));
    }

    #[tokio::test]
    async fn loader_state_overrides_initial_and_saves_back() {
        let mut config = EngineConfig::default();
        config.state.initial = json!({"theme": "light", "lang": "en"});
        let loader = MemoryLoader::new(json!({"theme": "dark"}));
        let engine = Engine::builder()
            .config(config)
            .loader(loader.clone())
            .build()
            .unwrap();

        engine.init().await.unwrap();
        assert_eq!(engine.state().get("theme"), Some(json!("dark")));
        assert_eq!(engine.state().get("lang"), Some(json!("en")));

        engine.state().set("user.name", "ada").unwrap();
        engine.save_state().await.unwrap();
        assert_eq!(loader.contents()["user"]["name"], "ada");

        loader.push(json!({"theme": "contrast"}));
        assert_eq!(engine.state().get("theme"), Some(json!("contrast")));
        assert!(!engine.state().has("user"));

        loader.save(&json!({"restored": true})).await.unwrap();
        engine.load_state().await.unwrap();
        assert_eq!(engine.state().snapshot(), json!({"restored": true}));
    }

    #[tokio::test]
    async fn persistence_without_loader_is_an_error() {
        let engine = engine();
        assert!(matches!(engine.save_state().await, Err(KernelError::Loader(_))));
        assert!(matches!(engine.load_state().await, Err(KernelError::Loader(_))));
    }

    #[tokio::test]
    async fn plugins_share_services_through_extensions_and_middleware() {
        let engine = engine();
        engine.use_plugin(SaveCounter).await.unwrap();
        engine.init().await.unwrap();

        for _ in 0..2 {
            let mut ctx = MiddlewareContext::new("save", json!({}));
            engine.middleware().execute(&mut ctx).await.unwrap();
        }
        let mut ctx = MiddlewareContext::new("load", json!({}));
        engine.middleware().execute(&mut ctx).await.unwrap();

        let saves = engine.extensions().require::<Saves>().unwrap();
        assert_eq!(saves.0.load(Ordering::SeqCst), 2);
        assert_eq!(engine.state().get("saves"), Some(json!(2)));
    }

    #[tokio::test]
    async fn failed_init_reports_errors() {
        let engine = engine();
        let errors = capture(&engine, names::ENGINE_ERROR);
        let plugin_errors = capture(&engine, names::PLUGIN_ERROR);
        engine.use_plugin(Unreachable).await.unwrap();

        let err = engine.init().await.unwrap_err();
        assert!(matches!(err, KernelError::PluginInstallFailed { .. }));
        assert_eq!(engine.phase(), EnginePhase::Created);
        assert_eq!(plugin_errors.lock().len(), 1);
        assert_eq!(errors.lock()[0]["kind"], "plugin_install_failed");
    }

    #[tokio::test]
    async fn retried_init_loads_and_watches_once() {
        let loader = MemoryLoader::new(json!({"theme": {"mode": "dark"}}));
        let engine = Engine::builder().loader(loader.clone()).build().unwrap();
        engine.use_plugin(Unreachable).await.unwrap();

        assert!(engine.init().await.is_err());
        engine.state().set("theme.mode", "light").unwrap();
        engine.init().await.unwrap();
        assert_eq!(engine.phase(), EnginePhase::Ready);
        assert_eq!(engine.state().get("theme.mode"), Some(json!("light")));

        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        engine
            .state()
            .watch("theme", move |_, _| {
                h.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        loader.push(json!({"theme": {"mode": "contrast"}}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(engine.state().get("theme.mode"), Some(json!("contrast")));
    }

    #[tokio::test]
    async fn state_changes_reach_the_bus_unless_disabled() {
        let engine = engine();
        let changes = capture(&engine, names::STATE_CHANGED);
        engine.state().set("count", 1).unwrap();
        assert_eq!(changes.lock().len(), 1);

        let mut config = EngineConfig::default();
        config.state.emit_changes = false;
        let quiet = Engine::new(config).unwrap();
        let quiet_changes = capture(&quiet, names::STATE_CHANGED);
        quiet.state().set("count", 1).unwrap();
        assert!(quiet_changes.lock().is_empty());
    }

    #[tokio::test]
    async fn disabled_plugins_never_install() {
        let log: Log = Arc::default();
        let mut config = EngineConfig::default();
        config.plugins.disabled = vec!["telemetry".into()];
        let engine = Engine::new(config).unwrap();
        engine.use_plugin(recorder("telemetry", &[], &log)).await.unwrap();
        engine.init().await.unwrap();
        assert!(log.lock().is_empty());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = EngineConfig::default();
        config.events.max_listeners = 0;
        assert!(matches!(Engine::new(config), Err(KernelError::Config(_))));
    }
}
