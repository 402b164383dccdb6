//! Plugin manager.
//!
//! Plugins are registered (queued), resolved against each other's declared
//! dependencies and installed in topological order. Removal tears down the
//! named plugin and everything depending on it, dependents first.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use futures::FutureExt;
use keel_core::{KernelError, KernelResult};
use keel_events::names;
use parking_lot::RwLock;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn, Instrument};

use crate::plugin::{Plugin, PluginContext, PluginInfo, PluginServices, PluginState};
use crate::resolver::{dependents_of, DependencyGraph};

struct Record {
    plugin: Arc<dyn Plugin>,
    info: PluginInfo,
    seq: u64,
    context: Option<PluginContext>,
}

#[derive(Default)]
struct Registry {
    records: HashMap<String, Record>,
    /// Installed plugin names, in the order they finished installing.
    install_order: Vec<String>,
    next_seq: u64,
}

/// Cloneable handle to the plugin registry.
#[derive(Clone)]
pub struct PluginManager {
    registry: Arc<RwLock<Registry>>,
    /// Serialises install and uninstall runs.
    ops: Arc<Mutex<()>>,
    services: PluginServices,
    disabled: Arc<HashSet<String>>,
}

impl PluginManager {
    pub fn new(services: PluginServices) -> Self {
        Self {
            registry: Arc::default(),
            ops: Arc::default(),
            services,
            disabled: Arc::default(),
        }
    }

    /// Names that `register` silently skips.
    pub fn with_disabled<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disabled = Arc::new(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn services(&self) -> &PluginServices {
        &self.services
    }

    /// Queue a plugin without installing it. Returns `false` if the plugin is disabled.
    pub fn register(&self, plugin: impl Plugin + 'static) -> KernelResult<bool> {
        self.register_arc(Arc::new(plugin))
    }

    pub fn register_arc(&self, plugin: Arc<dyn Plugin>) -> KernelResult<bool> {
        let name = plugin.name().to_string();
        if self.disabled.contains(&name) {
            warn!(plugin = %name, "Plugin is disabled; skipping");
            return Ok(false);
        }

        let info = {
            let mut registry = self.registry.write();
            if let Some(existing) = registry.records.get(&name) {
                if existing.info.state != PluginState::Removed {
                    return Err(KernelError::DuplicatePlugin(name));
                }
            }
            registry.next_seq += 1;
            let info = PluginInfo {
                name: name.clone(),
                version: plugin.version().to_string(),
                dependencies: plugin.dependencies(),
                state: PluginState::Registered,
                registered_at: Utc::now(),
                installed_at: None,
                error: None,
            };
            let seq = registry.next_seq;
            registry.records.insert(
                name.clone(),
                Record {
                    plugin,
                    info: info.clone(),
                    seq,
                    context: None,
                },
            );
            info
        };

        debug!(plugin = %name, version = %info.version, dependencies = ?info.dependencies, "Plugin registered");
        self.services.events.emit(
            names::PLUGIN_REGISTERED,
            json!({ "name": info.name, "version": info.version }),
        );
        Ok(true)
    }

    /// Register and install in one step. Dependencies must already be
    /// registered; queued ones are installed along with the new plugin.
    ///
    /// On a resolution error the plugin is unregistered again; on an install
    /// error it stays registered in the `Failed` state.
    pub async fn use_plugin(&self, plugin: impl Plugin + 'static) -> KernelResult<()> {
        let name = plugin.name().to_string();
        if !self.register(plugin)? {
            return Ok(());
        }
        let _op = self.ops.lock().await;
        let order = match self.resolve(&[name.as_str()]) {
            Ok(order) => order,
            Err(e) => {
                self.forget(&name);
                return Err(e);
            }
        };
        self.install_in_order(order).await.map(|_| ())
    }

    /// Install every queued plugin, dependencies first.
    ///
    /// Queued plugins whose dependencies failed are marked `Failed` and
    /// skipped. Other resolution errors abort before anything is installed.
    /// An install error stops the run; plugins installed earlier in the run
    /// stay installed.
    pub async fn install_pending(&self) -> KernelResult<Vec<String>> {
        let _op = self.ops.lock().await;
        let failed: Vec<String> = self
            .registry
            .read()
            .records
            .values()
            .filter(|r| r.info.state == PluginState::Failed)
            .map(|r| r.info.name.clone())
            .collect();
        for name in &failed {
            self.fail_dependents(name);
        }
        let pending = self.pending();
        let roots: Vec<&str> = pending.iter().map(String::as_str).collect();
        let order = self.resolve(&roots)?;
        self.install_in_order(order).await
    }

    fn forget(&self, name: &str) {
        let mut registry = self.registry.write();
        if registry
            .records
            .get(name)
            .is_some_and(|r| r.info.state == PluginState::Registered)
        {
            registry.records.remove(name);
        }
    }

    /// Install order for `roots` over the queued and installed plugins.
    fn resolve(&self, roots: &[&str]) -> KernelResult<Vec<String>> {
        let registry = self.registry.read();
        let graph = DependencyGraph {
            dependencies: registry
                .records
                .iter()
                .filter(|(_, r)| {
                    matches!(r.info.state, PluginState::Registered | PluginState::Installed)
                })
                .map(|(name, r)| (name.as_str(), r.info.dependencies.as_slice()))
                .collect(),
            installed: registry
                .records
                .iter()
                .filter(|(_, r)| r.info.state == PluginState::Installed)
                .map(|(name, _)| name.as_str())
                .collect(),
        };
        graph.install_order(roots)
    }

    /// Mark every queued plugin that transitively depends on `failed` as failed too.
    fn fail_dependents(&self, failed: &str) -> Vec<String> {
        let blocked: Vec<String> = {
            let mut registry = self.registry.write();
            let dependents = {
                let graph: HashMap<&str, &[String]> = registry
                    .records
                    .iter()
                    .filter(|(_, r)| r.info.state == PluginState::Registered)
                    .map(|(n, r)| (n.as_str(), r.info.dependencies.as_slice()))
                    .collect();
                dependents_of(failed, &graph)
            };
            let mut blocked: Vec<(u64, String)> = Vec::with_capacity(dependents.len());
            for name in dependents {
                if let Some(record) = registry.records.get_mut(&name) {
                    record.info.state = PluginState::Failed;
                    record.info.error = Some(format!("dependency '{failed}' failed to install"));
                    blocked.push((record.seq, name));
                }
            }
            blocked.sort();
            blocked.into_iter().map(|(_, name)| name).collect()
        };

        for name in &blocked {
            warn!(plugin = %name, dependency = %failed, "Plugin blocked by failed dependency");
            self.services.events.emit(
                names::PLUGIN_ERROR,
                json!({
                    "name": name,
                    "phase": "install",
                    "error": format!("dependency '{failed}' failed to install"),
                }),
            );
        }
        blocked
    }

    async fn install_in_order(&self, order: Vec<String>) -> KernelResult<Vec<String>> {
        let mut installed = Vec::with_capacity(order.len());
        for name in order {
            let (plugin, context) = {
                let mut registry = self.registry.write();
                let Some(record) = registry.records.get_mut(&name) else {
                    continue;
                };
                record.info.state = PluginState::Resolving;
                let context =
                    PluginContext::new(&self.services, &record.info.name, &record.info.version);
                (Arc::clone(&record.plugin), context)
            };

            let span = context.span().clone();
            let outcome = AssertUnwindSafe(plugin.install(&context).instrument(span))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(anyhow!("install panicked")));

            match outcome {
                Ok(()) => {
                    let version = {
                        let mut registry = self.registry.write();
                        registry.install_order.push(name.clone());
                        match registry.records.get_mut(&name) {
                            Some(record) => {
                                record.info.state = PluginState::Installed;
                                record.info.installed_at = Some(Utc::now());
                                record.info.error = None;
                                record.context = Some(context);
                                record.info.version.clone()
                            }
                            None => String::new(),
                        }
                    };
                    info!(plugin = %name, version = %version, "Plugin installed");
                    self.services.events.emit(
                        names::PLUGIN_INSTALLED,
                        json!({ "name": name, "version": version }),
                    );
                    installed.push(name);
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    if let Some(record) = self.registry.write().records.get_mut(&name) {
                        record.info.state = PluginState::Failed;
                        record.info.error = Some(message.clone());
                    }
                    error!(plugin = %name, error = %message, "Plugin install failed");
                    self.services.events.emit(
                        names::PLUGIN_ERROR,
                        json!({ "name": name, "phase": "install", "error": message }),
                    );
                    self.fail_dependents(&name);
                    return Err(KernelError::PluginInstallFailed {
                        plugin: name,
                        source: err,
                    });
                }
            }
        }
        Ok(installed)
    }

    /// Uninstall `name` and every plugin depending on it, dependents first.
    ///
    /// Dependents that were never installed are dropped without an uninstall
    /// call. Unknown or already removed names are a no-op. Returns the names removed.
    pub async fn remove(&self, name: &str) -> KernelResult<Vec<String>> {
        let _op = self.ops.lock().await;
        let (dropped, targets) = {
            let mut registry = self.registry.write();
            match registry.records.get(name).map(|r| r.info.state) {
                None | Some(PluginState::Removed) => return Ok(Vec::new()),
                _ => {}
            }
            let doomed = {
                let graph: HashMap<&str, &[String]> = registry
                    .records
                    .iter()
                    .filter(|(_, r)| r.info.state != PluginState::Removed)
                    .map(|(n, r)| (n.as_str(), r.info.dependencies.as_slice()))
                    .collect();
                let mut doomed = dependents_of(name, &graph);
                doomed.insert(name.to_string());
                doomed
            };

            let mut dropped: Vec<(u64, String)> = Vec::new();
            for target in &doomed {
                if let Some(record) = registry.records.get_mut(target) {
                    if matches!(record.info.state, PluginState::Registered | PluginState::Failed) {
                        record.info.state = PluginState::Removed;
                        dropped.push((record.seq, target.clone()));
                    }
                }
            }
            dropped.sort();
            let targets: Vec<String> = registry
                .install_order
                .iter()
                .rev()
                .filter(|n| doomed.contains(n.as_str()))
                .cloned()
                .collect();
            (
                dropped.into_iter().map(|(_, n)| n).collect::<Vec<_>>(),
                targets,
            )
        };

        if !dropped.is_empty() {
            debug!(plugins = ?dropped, "Dropping plugins that were never installed");
        }
        for target in &targets {
            self.uninstall_one(target).await;
        }
        let mut removed = dropped;
        removed.extend(targets);
        Ok(removed)
    }

    /// Uninstall every installed plugin in reverse install order.
    pub async fn uninstall_all(&self) -> Vec<String> {
        let _op = self.ops.lock().await;
        let order: Vec<String> = self.registry.read().install_order.iter().rev().cloned().collect();
        for name in &order {
            self.uninstall_one(name).await;
        }
        order
    }

    async fn uninstall_one(&self, name: &str) {
        let (plugin, context) = {
            let mut registry = self.registry.write();
            let Some(record) = registry.records.get_mut(name) else {
                return;
            };
            record.info.state = PluginState::Uninstalling;
            let context = record.context.take().unwrap_or_else(|| {
                PluginContext::new(&self.services, &record.info.name, &record.info.version)
            });
            (Arc::clone(&record.plugin), context)
        };

        let span = context.span().clone();
        let outcome = AssertUnwindSafe(plugin.uninstall(&context).instrument(span))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(anyhow!("uninstall panicked")));

        {
            let mut registry = self.registry.write();
            registry.install_order.retain(|n| n != name);
            if let Some(record) = registry.records.get_mut(name) {
                record.info.state = PluginState::Removed;
                record.info.installed_at = None;
                if let Err(err) = &outcome {
                    record.info.error = Some(format!("{err:#}"));
                }
            }
        }

        if let Err(err) = outcome {
            warn!(plugin = %name, error = %err, "Plugin uninstall failed");
            self.services.events.emit(
                names::PLUGIN_ERROR,
                json!({ "name": name, "phase": "uninstall", "error": format!("{err:#}") }),
            );
        }
        info!(plugin = %name, "Plugin uninstalled");
        self.services
            .events
            .emit(names::PLUGIN_UNINSTALLED, json!({ "name": name }));
    }

    pub fn state(&self, name: &str) -> Option<PluginState> {
        self.registry.read().records.get(name).map(|r| r.info.state)
    }

    pub fn info(&self, name: &str) -> Option<PluginInfo> {
        self.registry.read().records.get(name).map(|r| r.info.clone())
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.state(name) == Some(PluginState::Installed)
    }

    /// Installed plugins in install order.
    pub fn installed(&self) -> Vec<String> {
        self.registry.read().install_order.clone()
    }

    /// Registered but not yet installed, in registration order.
    pub fn pending(&self) -> Vec<String> {
        let registry = self.registry.read();
        let mut pending: Vec<&Record> = registry
            .records
            .values()
            .filter(|r| r.info.state == PluginState::Registered)
            .collect();
        pending.sort_by_key(|r| r.seq);
        pending.into_iter().map(|r| r.info.name.clone()).collect()
    }

    /// Every known plugin, in registration order.
    pub fn list(&self) -> Vec<PluginInfo> {
        let registry = self.registry.read();
        let mut records: Vec<&Record> = registry.records.values().collect();
        records.sort_by_key(|r| r.seq);
        records.into_iter().map(|r| r.info.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use keel_core::Payload;
    use parking_lot::Mutex as SyncMutex;

    type Log = Arc<SyncMutex<Vec<String>>>;

    struct TestPlugin {
        name: &'static str,
        deps: Vec<String>,
        fail: bool,
        log: Log,
    }

    impl TestPlugin {
        fn new(name: &'static str, deps: &[&str], log: &Log) -> Self {
            Self {
                name,
                deps: deps.iter().map(|d| d.to_string()).collect(),
                fail: false,
                log: Arc::clone(log),
            }
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }
    }

    #[async_trait]
    impl Plugin for TestPlugin {
        fn name(&self) -> &str {
            self.name
        }

        fn version(&self) -> &str {
            "1.0.0"
        }

        fn dependencies(&self) -> Vec<String> {
            self.deps.clone()
        }

        async fn install(&self, ctx: &PluginContext) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("{} refused to install", self.name);
            }
            ctx.state.set(&format!("plugins.{}", self.name), true)?;
            self.log.lock().push(format!("install:{}", self.name));
            Ok(())
        }

        async fn uninstall(&self, _ctx: &PluginContext) -> anyhow::Result<()> {
            self.log.lock().push(format!("uninstall:{}", self.name));
            Ok(())
        }
    }

    fn manager() -> PluginManager {
        PluginManager::new(PluginServices::default())
    }

    fn capture(manager: &PluginManager, event: &str) -> Arc<SyncMutex<Vec<Payload>>> {
        let seen = Arc::new(SyncMutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        manager.services().events.on(event, move |payload| {
            s.lock().push(payload.clone());
            Ok(())
        });
        seen
    }

    #[tokio::test]
    async fn dependency_registered_later_installs_first() {
        let log: Log = Arc::default();
        let pm = manager();
        pm.register(TestPlugin::new("a", &["b"], &log)).unwrap();
        pm.register(TestPlugin::new("b", &[], &log)).unwrap();
        assert_eq!(pm.pending(), vec!["a", "b"]);

        let installed = pm.install_pending().await.unwrap();
        assert_eq!(installed, vec!["b", "a"]);
        assert_eq!(*log.lock(), vec!["install:b", "install:a"]);
        assert_eq!(pm.installed(), vec!["b", "a"]);
        assert_eq!(pm.services().state.get("plugins.a"), Some(json!(true)));
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let log: Log = Arc::default();
        let pm = manager();
        pm.use_plugin(TestPlugin::new("theme", &[], &log)).await.unwrap();
        let err = pm
            .use_plugin(TestPlugin::new("theme", &[], &log))
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::DuplicatePlugin(name) if name == "theme"));
        assert_eq!(log.lock().len(), 1);
    }

    #[tokio::test]
    async fn missing_dependency_unregisters_the_plugin() {
        let log: Log = Arc::default();
        let pm = manager();
        let err = pm
            .use_plugin(TestPlugin::new("charts", &["data"], &log))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            KernelError::MissingDependency { ref plugin, ref dependency }
                if plugin == "charts" && dependency == "data"
        ));
        assert_eq!(pm.state("charts"), None);

        pm.use_plugin(TestPlugin::new("data", &[], &log)).await.unwrap();
        pm.use_plugin(TestPlugin::new("charts", &["data"], &log))
            .await
            .unwrap();
        assert_eq!(pm.installed(), vec!["data", "charts"]);
    }

    #[tokio::test]
    async fn cycles_never_install_partially() {
        let log: Log = Arc::default();
        let pm = manager();
        pm.register(TestPlugin::new("free", &[], &log)).unwrap();
        pm.register(TestPlugin::new("x", &["y"], &log)).unwrap();
        pm.register(TestPlugin::new("y", &["x"], &log)).unwrap();

        let err = pm.install_pending().await.unwrap_err();
        assert!(matches!(err, KernelError::CircularDependency { .. }));
        assert!(log.lock().is_empty());
        assert!(pm.installed().is_empty());
    }

    #[tokio::test]
    async fn install_failure_emits_error_and_keeps_earlier_installs() {
        let log: Log = Arc::default();
        let pm = manager();
        let errors = capture(&pm, names::PLUGIN_ERROR);
        pm.register(TestPlugin::new("base", &[], &log)).unwrap();
        pm.register(TestPlugin::new("broken", &["base"], &log).failing())
            .unwrap();
        pm.register(TestPlugin::new("after", &[], &log)).unwrap();

        let err = pm.install_pending().await.unwrap_err();
        assert!(matches!(err, KernelError::PluginInstallFailed { ref plugin, .. } if plugin == "broken"));

        assert_eq!(pm.state("base"), Some(PluginState::Installed));
        assert_eq!(pm.state("broken"), Some(PluginState::Failed));
        assert_eq!(pm.state("after"), Some(PluginState::Registered));
        assert_eq!(
            pm.info("broken").unwrap().error.as_deref(),
            Some("broken refused to install")
        );
        assert_eq!(
            *errors.lock(),
            vec![json!({"name": "broken", "phase": "install", "error": "broken refused to install"})]
        );

        // The untouched plugin installs on the next run.
        assert_eq!(pm.install_pending().await.unwrap(), vec!["after"]);
    }

    #[tokio::test]
    async fn failed_install_blocks_only_its_dependents() {
        let log: Log = Arc::default();
        let pm = manager();
        let errors = capture(&pm, names::PLUGIN_ERROR);
        pm.register(TestPlugin::new("base", &[], &log).failing()).unwrap();
        pm.register(TestPlugin::new("child", &["base"], &log)).unwrap();
        pm.register(TestPlugin::new("grandchild", &["child"], &log)).unwrap();

        let err = pm.install_pending().await.unwrap_err();
        assert!(matches!(err, KernelError::PluginInstallFailed { ref plugin, .. } if plugin == "base"));
        assert_eq!(pm.state("child"), Some(PluginState::Failed));
        assert_eq!(pm.state("grandchild"), Some(PluginState::Failed));
        assert_eq!(
            pm.info("child").unwrap().error.as_deref(),
            Some("dependency 'base' failed to install")
        );
        assert_eq!(errors.lock().len(), 3);
        assert!(pm.pending().is_empty());

        pm.use_plugin(TestPlugin::new("unrelated", &[], &log)).await.unwrap();
        assert!(pm.is_installed("unrelated"));
        assert!(pm.install_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn queued_plugin_on_failed_dependency_is_skipped_by_bulk_install() {
        let log: Log = Arc::default();
        let pm = manager();
        pm.use_plugin(TestPlugin::new("auth", &[], &log).failing())
            .await
            .unwrap_err();
        pm.register(TestPlugin::new("profile", &["auth"], &log)).unwrap();
        pm.register(TestPlugin::new("theme", &[], &log)).unwrap();

        assert_eq!(pm.install_pending().await.unwrap(), vec!["theme"]);
        assert_eq!(pm.state("profile"), Some(PluginState::Failed));

        let err = pm
            .use_plugin(TestPlugin::new("settings", &["auth"], &log))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("which is not available"));
        assert_eq!(pm.state("settings"), None);
    }

    #[tokio::test]
    async fn use_plugin_leaves_unrelated_queue_alone() {
        let log: Log = Arc::default();
        let pm = manager();
        pm.register(TestPlugin::new("queued", &[], &log)).unwrap();
        pm.register(TestPlugin::new("store", &[], &log)).unwrap();
        pm.use_plugin(TestPlugin::new("router", &["store"], &log))
            .await
            .unwrap();

        assert_eq!(pm.installed(), vec!["store", "router"]);
        assert_eq!(pm.pending(), vec!["queued"]);
    }

    #[tokio::test]
    async fn remove_drops_queued_dependents() {
        let log: Log = Arc::default();
        let pm = manager();
        pm.use_plugin(TestPlugin::new("store", &[], &log)).await.unwrap();
        pm.register(TestPlugin::new("widget", &["store"], &log)).unwrap();

        let removed = pm.remove("store").await.unwrap();
        assert_eq!(removed, vec!["widget", "store"]);
        assert_eq!(pm.state("widget"), Some(PluginState::Removed));
        assert!(pm.install_pending().await.unwrap().is_empty());
        assert_eq!(*log.lock(), vec!["install:store", "uninstall:store"]);
    }

    #[tokio::test]
    async fn remove_takes_dependents_down_first() {
        let log: Log = Arc::default();
        let pm = manager();
        let removed_events = capture(&pm, names::PLUGIN_UNINSTALLED);
        for (name, deps) in [("store", vec![]), ("router", vec!["store"]), ("app", vec!["router"]), ("other", vec![])] {
            pm.register(TestPlugin::new(name, &deps, &log)).unwrap();
        }
        pm.install_pending().await.unwrap();
        log.lock().clear();

        let removed = pm.remove("store").await.unwrap();
        assert_eq!(removed, vec!["app", "router", "store"]);
        assert_eq!(*log.lock(), vec!["uninstall:app", "uninstall:router", "uninstall:store"]);
        assert_eq!(pm.installed(), vec!["other"]);
        assert_eq!(removed_events.lock().len(), 3);

        assert!(pm.remove("store").await.unwrap().is_empty());
        assert!(pm.remove("ghost").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn removed_plugin_can_be_used_again() {
        let log: Log = Arc::default();
        let pm = manager();
        pm.use_plugin(TestPlugin::new("i18n", &[], &log)).await.unwrap();
        pm.remove("i18n").await.unwrap();
        assert_eq!(pm.state("i18n"), Some(PluginState::Removed));
        pm.use_plugin(TestPlugin::new("i18n", &[], &log)).await.unwrap();
        assert!(pm.is_installed("i18n"));
    }

    #[tokio::test]
    async fn uninstall_all_runs_in_reverse_install_order() {
        let log: Log = Arc::default();
        let pm = manager();
        pm.use_plugin(TestPlugin::new("one", &[], &log)).await.unwrap();
        pm.use_plugin(TestPlugin::new("two", &["one"], &log)).await.unwrap();
        pm.use_plugin(TestPlugin::new("three", &[], &log)).await.unwrap();
        log.lock().clear();

        assert_eq!(pm.uninstall_all().await, vec!["three", "two", "one"]);
        assert_eq!(*log.lock(), vec!["uninstall:three", "uninstall:two", "uninstall:one"]);
        assert!(pm.installed().is_empty());
    }

    #[tokio::test]
    async fn disabled_plugins_are_skipped() {
        let log: Log = Arc::default();
        let pm = manager().with_disabled(["telemetry"]);
        pm.use_plugin(TestPlugin::new("telemetry", &[], &log))
            .await
            .unwrap();
        assert_eq!(pm.state("telemetry"), None);
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn lifecycle_events_are_emitted() {
        let log: Log = Arc::default();
        let pm = manager();
        let registered = capture(&pm, names::PLUGIN_REGISTERED);
        let installed = capture(&pm, names::PLUGIN_INSTALLED);
        pm.use_plugin(TestPlugin::new("devtools", &[], &log)).await.unwrap();
        assert_eq!(*registered.lock(), vec![json!({"name": "devtools", "version": "1.0.0"})]);
        assert_eq!(*installed.lock(), vec![json!({"name": "devtools", "version": "1.0.0"})]);
        assert!(pm.info("devtools").unwrap().installed_at.is_some());
    }
}
