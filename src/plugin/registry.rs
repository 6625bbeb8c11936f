//! 插件注册表
//!
//! 已加载插件的运行时容器。每个插件在初始化、启动并对外可见之前，
//! 都要通过结构校验器、兼容性检查器和依赖解析。
//!
//! # 锁
//!
//! 查找只取映射的读锁。注册由 `registering` 串行化，
//! 写锁只在插入时持有，
//! 插件钩子运行时映射不会处于加锁状态。

use crate::connection::Connection;
use crate::plugin::compatibility::CompatibilityChecker;
use crate::plugin::dependency::{DependencyGraph, resolve_dependencies};
use crate::plugin::installer::{GitInstaller, InstallOptions, InstallOutcome};
use crate::plugin::loader::{LoadedPlugin, PluginLoader};
use crate::plugin::types::{Command, CommandArgs, Context, Plugin, PluginConfig, PluginError};
use crate::plugin::validation::Validator;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// 注册单个插件的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterOutcome {
    pub name: String,
    /// 之前注册过同名插件，现已被替换
    pub replaced: bool,
    /// 非阻断的发现：兼容性提示、可选依赖，
    /// 以及替换后不再满足的依赖方
    pub warnings: Vec<String>,
}

/// [`Registry::load_all`] 的结果
#[derive(Debug, Default)]
pub struct LoadReport {
    /// 已注册的插件，按加载顺序
    pub loaded: Vec<String>,
    pub failed: Vec<(String, PluginError)>,
    pub warnings: Vec<String>,
}

/// [`Registry::validate_all`] 中单个插件的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginReport {
    pub name: String,
    pub version: String,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl PluginReport {
    /// 严格模式下警告同样判为失败
    pub fn passed(&self, strict: bool) -> bool {
        self.errors.is_empty() && (!strict || self.warnings.is_empty())
    }
}

pub struct Registry {
    plugins: RwLock<HashMap<String, Arc<dyn Plugin>>>,
    registering: Mutex<()>,
    loader: Box<dyn PluginLoader>,
    checker: CompatibilityChecker,
}

impl Registry {
    pub fn new(loader: Box<dyn PluginLoader>) -> Self {
        Self::with_checker(loader, CompatibilityChecker::default())
    }

    pub fn with_checker(loader: Box<dyn PluginLoader>, checker: CompatibilityChecker) -> Self {
        Self {
            plugins: RwLock::new(HashMap::new()),
            registering: Mutex::new(()),
            loader,
            checker,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<dyn Plugin>>> {
        self.plugins.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<dyn Plugin>>> {
        self.plugins.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn checker(&self) -> &CompatibilityChecker {
        &self.checker
    }

    fn registered_version(&self, name: &str) -> Option<String> {
        self.read().get(name).map(|p| p.version().to_string())
    }

    /// 校验、检查并启动 `plugin`，然后以其名称插入
    ///
    /// 同名的已有插件会被替换并停止。依赖它的插件会对照新版本
    /// 重新检查；不再满足的依赖方保留注册，
    /// 并以警告形式报告。
    pub fn register(
        &self,
        mut plugin: Box<dyn Plugin>,
        config: &PluginConfig,
    ) -> Result<RegisterOutcome, PluginError> {
        let _serialized = self
            .registering
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let name = plugin.name().to_string();
        debug!(plugin = %name, version = plugin.version(), "registering plugin");

        Validator::ensure_valid(plugin.as_ref())?;
        let mut warnings = self.checker.ensure(plugin.as_ref())?;
        warnings.extend(resolve_dependencies(
            &name,
            &plugin.dependencies(),
            |dep| self.registered_version(dep),
        )?);

        plugin
            .initialize(config)
            .map_err(|e| initialization(&name, e))?;
        plugin
            .start(&Context::background())
            .map_err(|e| initialization(&name, e))?;

        let version = plugin.version().to_string();
        let plugin: Arc<dyn Plugin> = Arc::from(plugin);
        let previous = self.write().insert(name.clone(), plugin);

        let replaced = previous.is_some();
        if let Some(old) = previous {
            info!(plugin = %name, from = old.version(), to = %version, "replaced registered plugin");
            if let Err(e) = old.stop(&Context::background()) {
                warn!(plugin = %name, error = %e, "replaced plugin failed to stop");
            }
            warnings.extend(self.recheck_dependents(&name, &version));
        }

        for warning in &warnings {
            warn!(plugin = %name, "{}", warning);
        }
        Ok(RegisterOutcome {
            name,
            replaced,
            warnings,
        })
    }

    fn recheck_dependents(&self, name: &str, version: &str) -> Vec<String> {
        let mut dependents: Vec<(String, Arc<dyn Plugin>)> = self
            .read()
            .iter()
            .filter(|(other, _)| other.as_str() != name)
            .map(|(other, p)| (other.clone(), Arc::clone(p)))
            .collect();
        dependents.sort_by(|a, b| a.0.cmp(&b.0));

        let mut warnings = Vec::new();
        for (other, plugin) in dependents {
            let deps: Vec<_> = plugin
                .dependencies()
                .into_iter()
                .filter(|d| d.name == name)
                .collect();
            if deps.is_empty() {
                continue;
            }
            match resolve_dependencies(&other, &deps, |_| Some(version.to_string())) {
                Ok(optional) => warnings.extend(optional),
                Err(e) => warnings.push(format!("after replacing {}: {}", name, e)),
            }
        }
        warnings
    }

    /// 按依赖优先的顺序注册加载器产出的全部插件
    ///
    /// 失败相互隔离：循环依赖、未解析的依赖或不兼容的插件
    /// 只会移除相关插件。
    pub fn load_all(&self) -> Result<LoadReport, PluginError> {
        let batch = self.loader.load_plugins()?;
        let mut report = LoadReport {
            failed: batch.failures,
            ..Default::default()
        };

        let mut pending: HashMap<String, LoadedPlugin> = HashMap::new();
        for loaded in batch.plugins {
            let name = loaded.plugin.name().to_string();
            if pending.insert(name.clone(), loaded).is_some() {
                report
                    .warnings
                    .push(format!("plugin {} produced more than once; the last one wins", name));
            }
        }

        let mut graph = DependencyGraph::from_plugins(pending.values().map(|l| l.plugin.as_ref()));
        for cycle in graph.find_cycles() {
            for member in &cycle {
                if pending.remove(member).is_some() {
                    warn!(plugin = %member, cycle = %cycle.join(" -> "), "skipping plugin in dependency cycle");
                    graph.remove_node(member);
                    report
                        .failed
                        .push((member.clone(), PluginError::CyclicDependency(cycle.clone())));
                }
            }
        }

        for name in graph.get_load_order()? {
            let Some(loaded) = pending.remove(&name) else {
                continue;
            };
            match self.register(loaded.plugin, &loaded.config) {
                Ok(outcome) => {
                    report.warnings.extend(
                        outcome
                            .warnings
                            .into_iter()
                            .map(|w| format!("{}: {}", name, w)),
                    );
                    report.loaded.push(name);
                }
                Err(e) => {
                    warn!(plugin = %name, error = %e, "plugin failed to load");
                    report.failed.push((name, e));
                }
            }
        }

        info!(
            loader = self.loader.name(),
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "plugins loaded"
        );
        Ok(report)
    }

    /// 向加载器请求单个插件并注册
    pub fn load_plugin(&self, name: &str) -> Result<RegisterOutcome, PluginError> {
        let loaded = self
            .loader
            .load_plugin(name)?
            .ok_or_else(|| PluginError::PluginNotFound(name.to_string()))?;
        self.register(loaded.plugin, &loaded.config)
    }

    /// 从仓库安装并注册结果
    pub fn install_from(
        &self,
        installer: &GitInstaller,
        reference: &str,
        opts: &InstallOptions,
    ) -> Result<(InstallOutcome, RegisterOutcome), PluginError> {
        let outcome = installer.install(reference, opts)?;
        let registered = self.load_plugin(&outcome.target)?;
        Ok((outcome, registered))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.read().get(name).cloned()
    }

    pub fn require(&self, name: &str) -> Result<Arc<dyn Plugin>, PluginError> {
        self.get(name)
            .ok_or_else(|| PluginError::PluginNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// 全部已注册插件，按名称排序
    pub fn get_all(&self) -> Vec<Arc<dyn Plugin>> {
        let mut all: Vec<Arc<dyn Plugin>> = self.read().values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    /// 所有插件的全部命令，以插件名为键
    pub fn get_commands(&self) -> Vec<(String, Command)> {
        self.get_all()
            .iter()
            .flat_map(|p| {
                let name = p.name().to_string();
                p.commands().into_iter().map(move |c| (name.clone(), c))
            })
            .collect()
    }

    /// 已注册插件的依赖优先顺序
    pub fn load_order(&self) -> Result<Vec<String>, PluginError> {
        let all = self.get_all();
        DependencyGraph::from_plugins(all.iter().map(|p| p.as_ref())).get_load_order()
    }

    /// 直接或间接依赖 `name` 的已注册插件，按名称排序
    pub fn required_by(&self, name: &str) -> Vec<String> {
        let all = self.get_all();
        let graph = DependencyGraph::from_plugins(all.iter().map(|p| p.as_ref()));
        all.iter()
            .map(|p| p.name())
            .filter(|other| *other != name)
            .filter(|other| {
                graph
                    .transitive_dependencies(other)
                    .iter()
                    .any(|dep| dep == name)
            })
            .map(str::to_string)
            .collect()
    }

    /// 对 `conn` 执行 `plugin` 的 `command`
    pub fn dispatch(
        &self,
        plugin: &str,
        command: &str,
        conn: &dyn Connection,
        args: &CommandArgs,
    ) -> Result<(), PluginError> {
        let target = self.require(plugin)?;
        let cmd = target
            .commands()
            .into_iter()
            .find(|c| c.name == command)
            .ok_or_else(|| PluginError::CommandNotFound {
                plugin: plugin.to_string(),
                command: command.to_string(),
            })?;

        info!(plugin, command, host = conn.target(), "dispatching command");
        cmd.run(conn, args)
    }

    /// 对每个已注册插件重新运行校验器、兼容性检查器和依赖解析，
    /// 不会提前返回
    pub fn validate_all(&self) -> Vec<PluginReport> {
        self.get_all()
            .iter()
            .map(|plugin| {
                let mut report = PluginReport {
                    name: plugin.name().to_string(),
                    version: plugin.version().to_string(),
                    ..Default::default()
                };

                report.errors.extend(
                    Validator::validate_plugin(plugin.as_ref())
                        .iter()
                        .map(ToString::to_string),
                );

                let compat = self.checker.check(&plugin.compatibility());
                report.errors.extend(compat.errors);
                report.warnings.extend(compat.warnings);

                match resolve_dependencies(plugin.name(), &plugin.dependencies(), |dep| {
                    self.registered_version(dep)
                }) {
                    Ok(optional) => report.warnings.extend(optional),
                    Err(e) => report.errors.push(e.to_string()),
                }
                report
            })
            .collect()
    }

    /// 按加载顺序的逆序停止所有插件
    pub fn shutdown(&self) {
        let order = self.load_order().unwrap_or_else(|_| {
            self.get_all().iter().map(|p| p.name().to_string()).collect()
        });
        let ctx = Context::background();
        for name in order.iter().rev() {
            if let Some(plugin) = self.get(name)
                && let Err(e) = plugin.stop(&ctx)
            {
                warn!(plugin = %name, error = %e, "plugin failed to stop");
            }
        }
    }
}

fn initialization(plugin: &str, err: PluginError) -> PluginError {
    match err {
        e @ PluginError::Initialization { .. } => e,
        other => PluginError::Initialization {
            plugin: plugin.to_string(),
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::compatibility::Environment;
    use crate::plugin::loader::LoadBatch;
    use crate::plugin::types::{Compatibility, Dependency};
    use crate::test_utils::RecordingConnection;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct Lifecycle {
        started: Arc<AtomicUsize>,
        stopped: Arc<AtomicUsize>,
    }

    #[derive(Clone)]
    struct TestPlugin {
        name: String,
        version: String,
        deps: Vec<Dependency>,
        compat: Compatibility,
        required_setting: Option<&'static str>,
        lifecycle: Lifecycle,
    }

    impl TestPlugin {
        fn new(name: &str, version: &str) -> Self {
            Self {
                name: name.to_string(),
                version: version.to_string(),
                deps: Vec::new(),
                compat: Compatibility::default(),
                required_setting: None,
                lifecycle: Lifecycle::default(),
            }
        }

        fn needs(mut self, dep: &str, constraint: &str) -> Self {
            self.deps.push(Dependency::required(dep, constraint));
            self
        }
    }

    impl Plugin for TestPlugin {
        fn name(&self) -> &str {
            &self.name
        }
        fn description(&self) -> &str {
            "Test plugin"
        }
        fn version(&self) -> &str {
            &self.version
        }
        fn author(&self) -> &str {
            "tests"
        }
        fn initialize(&mut self, config: &PluginConfig) -> Result<(), PluginError> {
            if let Some(key) = self.required_setting {
                config.require(key)?;
            }
            Ok(())
        }
        fn commands(&self) -> Vec<Command> {
            vec![
                Command::new("ping", "Ping the host", |conn, _| {
                    conn.exec_checked("ping -c 1 localhost")?;
                    Ok(())
                }),
                Command::new("greet", "Greet someone", |conn, args| {
                    conn.exec_checked(&format!("echo hello {}", args.arg(0).unwrap_or("")))?;
                    Ok(())
                })
                .with_arg("who", "Name to greet", true),
            ]
        }
        fn dependencies(&self) -> Vec<Dependency> {
            self.deps.clone()
        }
        fn compatibility(&self) -> Compatibility {
            self.compat.clone()
        }
        fn start(&self, _ctx: &Context) -> Result<(), PluginError> {
            self.lifecycle.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn stop(&self, _ctx: &Context) -> Result<(), PluginError> {
            self.lifecycle.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// 基于固定插件集的加载器
    #[derive(Default)]
    struct StaticLoader(Vec<TestPlugin>);

    impl PluginLoader for StaticLoader {
        fn name(&self) -> &str {
            "static"
        }

        fn load_plugins(&self) -> Result<LoadBatch, PluginError> {
            Ok(LoadBatch {
                plugins: self
                    .0
                    .iter()
                    .map(|p| LoadedPlugin::unconfigured(Box::new(p.clone())))
                    .collect(),
                failures: Vec::new(),
            })
        }

        fn load_plugin(&self, name: &str) -> Result<Option<LoadedPlugin>, PluginError> {
            Ok(self
                .0
                .iter()
                .find(|p| p.name == name)
                .map(|p| LoadedPlugin::unconfigured(Box::new(p.clone()))))
        }
    }

    fn linux_registry(plugins: Vec<TestPlugin>) -> Registry {
        let env = Environment {
            host_version: "1.0.0".to_string(),
            runtime_version: "1.85.0".to_string(),
            os: "linux".to_string(),
            arch: "amd64".to_string(),
        };
        Registry::with_checker(Box::new(StaticLoader(plugins)), CompatibilityChecker::new(env))
    }

    fn register(registry: &Registry, plugin: TestPlugin) -> Result<RegisterOutcome, PluginError> {
        let config = PluginConfig::new(&plugin.name);
        registry.register(Box::new(plugin), &config)
    }

    #[test]
    fn test_unsatisfied_required_dependency() {
        let registry = linux_registry(Vec::new());
        register(&registry, TestPlugin::new("b", "1.5.0")).unwrap();

        let err = register(&registry, TestPlugin::new("a", "1.0.0").needs("b", ">=2.0.0")).unwrap_err();
        match &err {
            PluginError::UnresolvedDependency {
                plugin, dependency, ..
            } => {
                assert_eq!(plugin, "a");
                assert_eq!(dependency, "b");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            err.to_string(),
            "plugin a requires dependency b >=2.0.0, none registered satisfies this (found 1.5.0)"
        );
        assert!(!registry.contains("a"));
    }

    #[test]
    fn test_satisfied_dependency_orders_first() {
        let registry = linux_registry(Vec::new());
        register(&registry, TestPlugin::new("b", "2.1.0")).unwrap();
        register(&registry, TestPlugin::new("a", "1.0.0").needs("b", ">=2.0.0")).unwrap();

        let order = registry.load_order().unwrap();
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
        assert!(pos("b") < pos("a"));
    }

    #[test]
    fn test_required_by_follows_transitive_dependents() {
        let registry = linux_registry(Vec::new());
        register(&registry, TestPlugin::new("base", "1.0.0")).unwrap();
        register(&registry, TestPlugin::new("mid", "1.0.0").needs("base", ">=1")).unwrap();
        register(&registry, TestPlugin::new("top", "1.0.0").needs("mid", ">=1")).unwrap();
        register(&registry, TestPlugin::new("lone", "1.0.0")).unwrap();

        assert_eq!(registry.required_by("base"), vec!["mid", "top"]);
        assert_eq!(registry.required_by("mid"), vec!["top"]);
        assert!(registry.required_by("top").is_empty());
        assert!(registry.required_by("missing").is_empty());
    }

    #[test]
    fn test_load_all_orders_and_isolates_failures() {
        let registry = linux_registry(vec![
            TestPlugin::new("app", "1.0.0").needs("db", ">=2"),
            TestPlugin::new("db", "2.3.0"),
            TestPlugin::new("ping", "1.0.0").needs("pong", "*"),
            TestPlugin::new("pong", "1.0.0").needs("ping", "*"),
            TestPlugin::new("orphan", "1.0.0").needs("missing", ">=1.0.0"),
            TestPlugin::new("lonely", "0.1.0"),
        ]);

        let report = registry.load_all().unwrap();
        let mut loaded = report.loaded.clone();
        loaded.sort();
        assert_eq!(loaded, vec!["app", "db", "lonely"]);
        let pos = |n: &str| report.loaded.iter().position(|x| x == n).unwrap();
        assert!(pos("db") < pos("app"));

        let failed: HashMap<&str, &PluginError> =
            report.failed.iter().map(|(n, e)| (n.as_str(), e)).collect();
        assert_eq!(failed.len(), 3);
        assert!(matches!(failed["ping"], PluginError::CyclicDependency(_)));
        assert!(matches!(failed["pong"], PluginError::CyclicDependency(_)));
        assert!(matches!(failed["orphan"], PluginError::UnresolvedDependency { .. }));
    }

    #[test]
    fn test_incompatible_plugin_is_rejected() {
        let mut plugin = TestPlugin::new("mac-only", "1.0.0");
        plugin.compat.platforms = vec!["darwin/*".to_string()];
        let registry = linux_registry(vec![plugin.clone()]);

        let report = registry.load_all().unwrap();
        assert!(report.loaded.is_empty());
        assert!(matches!(
            report.failed[0].1,
            PluginError::IncompatibleEnvironment { .. }
        ));
        assert_eq!(plugin.lifecycle.started.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_initialization_failure_names_plugin() {
        let mut plugin = TestPlugin::new("vault", "1.0.0");
        plugin.required_setting = Some("token");
        let registry = linux_registry(Vec::new());

        let err = register(&registry, plugin.clone()).unwrap_err();
        assert!(matches!(err, PluginError::Initialization { ref plugin, .. } if plugin == "vault"));

        let mut config = PluginConfig::new("vault");
        config.settings.insert("token".to_string(), "s3cr3t".to_string());
        registry.register(Box::new(plugin), &config).unwrap();
        assert!(registry.contains("vault"));
    }

    #[test]
    fn test_replacement_warns_about_dependents() {
        let registry = linux_registry(Vec::new());
        let old = TestPlugin::new("db", "2.3.0");
        register(&registry, old.clone()).unwrap();
        register(&registry, TestPlugin::new("app", "1.0.0").needs("db", ">=2")).unwrap();

        let outcome = register(&registry, TestPlugin::new("db", "1.9.0")).unwrap();
        assert!(outcome.replaced);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("plugin app requires dependency db >=2"));

        // 未被移除，被替换的实例已停止
        assert!(registry.contains("app"));
        assert_eq!(registry.get("db").unwrap().version(), "1.9.0");
        assert_eq!(old.lifecycle.stopped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_load_plugin_by_name() {
        let registry = linux_registry(vec![TestPlugin::new("db", "2.3.0")]);
        let outcome = registry.load_plugin("db").unwrap();
        assert_eq!(outcome.name, "db");
        assert!(!outcome.replaced);
        assert!(matches!(
            registry.load_plugin("nope"),
            Err(PluginError::PluginNotFound(_))
        ));
    }

    #[test]
    fn test_dispatch() {
        let registry = linux_registry(Vec::new());
        register(&registry, TestPlugin::new("net", "1.0.0")).unwrap();
        let conn = RecordingConnection::new();

        registry
            .dispatch("net", "greet", &conn, &CommandArgs::parse(&["world".to_string()]))
            .unwrap();
        assert_eq!(conn.executed(), vec!["echo hello world"]);

        assert!(matches!(
            registry.dispatch("net", "greet", &conn, &CommandArgs::default()),
            Err(PluginError::ExecutionFailed(_))
        ));
        assert!(matches!(
            registry.dispatch("net", "reboot", &conn, &CommandArgs::default()),
            Err(PluginError::CommandNotFound { .. })
        ));
        assert!(matches!(
            registry.dispatch("nope", "ping", &conn, &CommandArgs::default()),
            Err(PluginError::PluginNotFound(_))
        ));
    }

    #[test]
    fn test_commands_and_validation_reports() {
        let registry = linux_registry(Vec::new());
        register(&registry, TestPlugin::new("b", "1.0.0")).unwrap();
        register(&registry, TestPlugin::new("a", "1.0.0").needs("b", ">=1.0.0")).unwrap();

        let commands = registry.get_commands();
        assert_eq!(commands.len(), 4);
        assert_eq!(commands[0].0, "a");

        let reports = registry.validate_all();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.passed(true)));
    }

    #[test]
    fn test_shutdown_stops_everything() {
        let registry = linux_registry(Vec::new());
        let a = TestPlugin::new("a", "1.0.0");
        let b = TestPlugin::new("b", "1.0.0");
        register(&registry, a.clone()).unwrap();
        register(&registry, b.clone()).unwrap();
        assert_eq!(a.lifecycle.started.load(Ordering::SeqCst), 1);

        registry.shutdown();
        assert_eq!(a.lifecycle.stopped.load(Ordering::SeqCst), 1);
        assert_eq!(b.lifecycle.stopped.load(Ordering::SeqCst), 1);
    }
}
